use crate::AppState;
use crate::api::error::AppError;
use crate::services::bundle::{BundleEntry, write_bundle};
use crate::utils::validation::{
    NO_FILE_MESSAGE, attachment_disposition, content_type_for, file_too_large,
    sanitize_filename, validate_extension, validate_file_size,
};
use axum::{
    body::Body,
    extract::{
        Multipart, Query, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
    },
    http::{StatusCode, header},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BundleFormat {
    /// ZIP archive holding the original upload and the converted file
    Zip,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ConvertParams {
    /// Return a bundle instead of the bare converted file
    #[param(inline)]
    pub bundle: Option<BundleFormat>,
}

/// Multipart body accepted by the convert endpoint
#[derive(ToSchema)]
pub struct ConvertUpload {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// An uploaded document held in memory for the duration of one request
#[derive(Debug)]
pub struct Upload {
    pub file_name: String,
    pub data: Bytes,
}

#[utoipa::path(
    post,
    path = "/api/v1/convert",
    params(ConvertParams),
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Converted document as an attachment"),
        (status = 400, description = "Missing, oversized or unsupported upload"),
        (status = 401, description = "Invalid or missing API token"),
        (status = 500, description = "Saving or conversion failed")
    ),
    security(
        ("api_token" = [])
    ),
    tag = "convert"
)]
pub async fn convert_document(
    State(state): State<AppState>,
    query: Result<Query<ConvertParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let config = &state.config;
    let Query(params) = query.map_err(|e| {
        debug!("Rejected query string: {}", e);
        AppError::BadRequest(format!("Invalid query string: {}", e.body_text()))
    })?;

    let upload = read_upload(multipart, config.max_file_size).await?;
    validate_extension(&upload.file_name, &config.input_extension)?;

    info!(
        "📄 Received {} ({} bytes)",
        upload.file_name,
        upload.data.len()
    );

    state.scratch.ensure().await.map_err(|e| {
        error!(
            "Failed to create {}: {}",
            state.scratch.root().display(),
            e
        );
        AppError::Internal("Failed to create temporary directory".to_string())
    })?;

    let mut scratch = state.scratch.allocate(&config.input_extension);

    if let Err(e) = tokio::fs::write(scratch.input(), &upload.data).await {
        error!("Failed to save {}: {}", scratch.input().display(), e);
        scratch.cleanup().await;
        return Err(AppError::Internal(
            "Failed to save uploaded file".to_string(),
        ));
    }

    let output = match state.converter.convert(scratch.input()).await {
        Ok(output) => output,
        Err(e) => {
            scratch.cleanup().await;
            return Err(e.into());
        }
    };
    scratch.track_output(&output);

    let output_ext = state.converter.output_extension().to_string();
    let (body_path, download_name, content_type) = match params.bundle {
        None => (
            output.clone(),
            format!("{}.{}", upload.file_name, output_ext),
            content_type_for(&output_ext),
        ),
        Some(BundleFormat::Zip) => {
            let stem = Path::new(&upload.file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            let archive = output.with_extension("zip");
            let entries = vec![
                BundleEntry {
                    name: upload.file_name.clone(),
                    source: scratch.input().to_path_buf(),
                },
                BundleEntry {
                    name: format!("{}.{}", stem, output_ext),
                    source: output.clone(),
                },
            ];

            if let Err(e) = write_bundle(&archive, entries).await {
                error!("Failed to bundle {}: {:?}", output.display(), e);
                scratch.cleanup().await;
                return Err(AppError::Internal("Failed to build bundle".to_string()));
            }
            scratch.track_output(&archive);
            (archive, format!("{}.zip", stem), content_type_for("zip"))
        }
    };

    let file = match tokio::fs::File::open(&body_path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open {}: {}", body_path.display(), e);
            scratch.cleanup().await;
            return Err(AppError::Internal(
                "Failed to read converted file".to_string(),
            ));
        }
    };
    let content_length = file.metadata().await.ok().map(|m| m.len());

    debug!(
        "Streaming {} as {} (scratch id {})",
        body_path.display(),
        download_name,
        scratch.id()
    );

    // The stream owns the scratch guard, so the files are removed once the
    // body has been sent or the client has gone away
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _keep_alive = &scratch;
        chunk
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(
            header::CONTENT_DISPOSITION,
            attachment_disposition(&download_name),
        );
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Reads the `file` field, enforcing `max_size` before anything reaches disk
pub async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    max_size: usize,
) -> Result<Upload, AppError> {
    let mut multipart = multipart.map_err(|e| {
        debug!("Rejected multipart body: {}", e);
        AppError::BadRequest(NO_FILE_MESSAGE.to_string())
    })?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_size))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = match field.file_name() {
            Some(name) => sanitize_filename(name)?,
            None => return Err(AppError::BadRequest(NO_FILE_MESSAGE.to_string())),
        };

        let mut data = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, max_size))?
        {
            validate_file_size(data.len() + chunk.len(), max_size)?;
            data.extend_from_slice(&chunk);
        }

        return Ok(Upload {
            file_name,
            data: data.freeze(),
        });
    }

    Err(AppError::BadRequest(NO_FILE_MESSAGE.to_string()))
}

fn multipart_error(e: MultipartError, max_size: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return file_too_large(max_size).into();
    }
    debug!("Malformed multipart body: {}", e);
    AppError::BadRequest(NO_FILE_MESSAGE.to_string())
}
