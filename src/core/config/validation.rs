use serde_json::{Map, Value};

use crate::rag::RagError;

/// Shape checks on the merged configuration document, run before it is
/// deserialized into [`super::Settings`] so errors name the offending path.
pub fn validate_config(config: &Value) -> Result<(), RagError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65535)?;
        validate_u64_field(
            server,
            "server.request_timeout_secs",
            "request_timeout_secs",
            1,
            3600,
        )?;
        validate_u64_field(
            server,
            "server.max_message_chars",
            "max_message_chars",
            1,
            1_000_000,
        )?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(chunking) = expect_optional_object(root, "chunking")? {
        validate_u64_field(chunking, "chunking.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(
            chunking,
            "chunking.chunk_overlap",
            "chunk_overlap",
            0,
            1_000_000,
        )?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 1000)?;
        validate_f64_field(
            retrieval,
            "retrieval.similarity_threshold",
            "similarity_threshold",
            0.0,
            1.0,
        )?;
        validate_optional_string_field(retrieval, "retrieval.refusal_message", "refusal_message")?;
    }

    if let Some(context) = expect_optional_object(root, "context")? {
        validate_u64_field(
            context,
            "context.max_chunk_chars",
            "max_chunk_chars",
            1,
            1_000_000,
        )?;
        validate_u64_field(context, "context.snippet_chars", "snippet_chars", 0, 100_000)?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_enum_field(
            embedding,
            "embedding.backend",
            "backend",
            &["local", "hashing", "open_ai"],
        )?;
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_optional_string_field(embedding, "embedding.model_dir", "model_dir")?;
        validate_optional_string_field(embedding, "embedding.model_repo_url", "model_repo_url")?;
        validate_u64_field(embedding, "embedding.max_length", "max_length", 1, 8192)?;
        validate_u64_field(
            embedding,
            "embedding.download_timeout_secs",
            "download_timeout_secs",
            1,
            86_400,
        )?;
        validate_optional_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_u64_field(embedding, "embedding.dimension", "dimension", 1, 65_536)?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 3600)?;
        validate_u64_field(embedding, "embedding.concurrency", "concurrency", 1, 64)?;
    }

    if let Some(generator) = expect_optional_object(root, "generator")? {
        validate_optional_string_field(generator, "generator.model", "model")?;
        validate_optional_string_field(generator, "generator.base_url", "base_url")?;
        validate_f64_field(generator, "generator.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(generator, "generator.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_u64_field(
            generator,
            "generator.max_answer_words",
            "max_answer_words",
            1,
            100_000,
        )?;
        validate_u64_field(generator, "generator.timeout_secs", "timeout_secs", 1, 3600)?;
        validate_u64_field(generator, "generator.max_retries", "max_retries", 0, 10)?;
        validate_u64_field(
            generator,
            "generator.initial_backoff_ms",
            "initial_backoff_ms",
            0,
            600_000,
        )?;
        validate_u64_field(
            generator,
            "generator.max_backoff_ms",
            "max_backoff_ms",
            0,
            600_000,
        )?;
    }

    if let Some(index) = expect_optional_object(root, "index")? {
        validate_bool_field(index, "index.rebuild_on_start", "rebuild_on_start")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, RagError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if !allowed.contains(&text) {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': expected one of {}",
            path,
            allowed.join(", ")
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(RagError::Configuration(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> RagError {
    RagError::Configuration(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
