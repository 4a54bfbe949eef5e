//! Multipart upload parsing.
//!
//! Everything here runs before anything is staged: a malformed upload is
//! rejected without touching the disk or the engine.

use std::collections::HashMap;

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use geoconvert_core::format::split_kind_prefix;
use geoconvert_core::{
    ConversionParams, ConversionRequest, ConvertError, ConvertResult, CreationOption, DataClass,
    FormatTag, GeospatialArtifact, Resampling, SpatialRef,
};
use geoconvert_engine::DriverCatalog;
use tracing::debug;

const FILE_FIELD: &str = "file";
const CREATION_OPTION_FIELD: &str = "creation_option";
const TEXT_FIELDS: &[&str] = &[
    "target_format",
    "source_format",
    "target_srs",
    "source_srs",
    "resampling",
    "data_class",
    "layer_name",
];

/// The uploaded file part.
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub bytes: axum::body::Bytes,
}

/// A parsed multipart form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
    pub creation_options: Vec<String>,
}

impl UploadForm {
    /// Drain a multipart body, enforcing the upload size limit.
    pub async fn read(mut multipart: Multipart, max_upload_bytes: u64) -> ConvertResult<Self> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_upload_bytes))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                FILE_FIELD => {
                    if form.file.is_some() {
                        return Err(ConvertError::invalid_input(
                            "only one file may be uploaded per request",
                        ));
                    }
                    let file_name = field.file_name().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| multipart_error(e, max_upload_bytes))?;
                    if bytes.len() as u64 > max_upload_bytes {
                        return Err(ConvertError::PayloadTooLarge {
                            limit: max_upload_bytes,
                        });
                    }
                    form.file = Some(UploadedFile { file_name, bytes });
                }
                CREATION_OPTION_FIELD => {
                    let value = field_text(field).await?;
                    form.creation_options.push(value);
                }
                known if TEXT_FIELDS.contains(&known) => {
                    let value = field_text(field).await?;
                    let value = value.trim();
                    if !value.is_empty() {
                        form.fields.insert(known.to_string(), value.to_string());
                    }
                }
                other => debug!(field = other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The uploaded payload, with its source format resolved.
    ///
    /// `kind_hint` picks the data kind for drivers that hold both.
    pub fn into_artifact(
        mut self,
        catalog: &DriverCatalog,
        kind_hint: Option<&FormatTag>,
    ) -> ConvertResult<(GeospatialArtifact, ConversionParams)> {
        let file = self
            .file
            .take()
            .ok_or_else(|| ConvertError::invalid_input("missing 'file' field"))?;
        if file.bytes.is_empty() {
            return Err(ConvertError::invalid_input("uploaded file is empty"));
        }

        let format = self.source_format(catalog, file.file_name.as_deref(), kind_hint)?;
        let params = self.params()?;

        let mut artifact = GeospatialArtifact::new(file.bytes, format);
        if let Some(name) = file.file_name {
            artifact = artifact.with_file_name(name);
        }
        Ok((artifact, params))
    }

    /// Build a full conversion request.
    pub fn into_conversion_request(self, catalog: &DriverCatalog) -> ConvertResult<ConversionRequest> {
        if self.file.is_none() {
            return Err(ConvertError::invalid_input("missing 'file' field"));
        }
        let target = match self.field("target_format") {
            None => return Err(ConvertError::invalid_input("missing 'target_format' field")),
            Some(raw) => catalog.resolve(raw).ok_or_else(|| {
                ConvertError::unsupported_target(format!("unknown target format '{raw}'"))
            })?,
        };
        let (artifact, params) = self.into_artifact(catalog, Some(&target))?;
        Ok(ConversionRequest::new(artifact, target).with_params(params))
    }

    fn source_format(
        &self,
        catalog: &DriverCatalog,
        file_name: Option<&str>,
        kind_hint: Option<&FormatTag>,
    ) -> ConvertResult<FormatTag> {
        let (mut format, forced) = match self.field("source_format") {
            Some(raw) => {
                let format = catalog.resolve(raw).ok_or_else(|| {
                    ConvertError::invalid_input(format!("unknown source format '{raw}'"))
                })?;
                (format, split_kind_prefix(raw).0.is_some())
            }
            None => {
                let format = file_name.and_then(FormatTag::from_file_name).ok_or_else(|| {
                    ConvertError::invalid_input(
                        "cannot infer the source format from the file name; set 'source_format'",
                    )
                })?;
                (format, false)
            }
        };

        // Drivers such as GPKG hold rasters and vectors; follow the target.
        if let Some(hint) = kind_hint {
            let dual = catalog
                .get(&format.driver)
                .is_some_and(|d| d.supports(hint.kind));
            if !forced && format.kind != hint.kind && dual {
                format.kind = hint.kind;
            }
        }
        Ok(format)
    }

    fn params(&self) -> ConvertResult<ConversionParams> {
        let target_srs = self
            .field("target_srs")
            .map(SpatialRef::parse)
            .transpose()
            .map_err(|e| ConvertError::unsupported_target(format!("invalid target_srs: {e}")))?;
        let source_srs = self
            .field("source_srs")
            .map(SpatialRef::parse)
            .transpose()
            .map_err(|e| ConvertError::invalid_input(format!("invalid source_srs: {e}")))?;
        let resampling = self
            .field("resampling")
            .map(str::parse::<Resampling>)
            .transpose()?;
        let data_class = self
            .field("data_class")
            .map(str::parse::<DataClass>)
            .transpose()?;
        let creation_options = self
            .creation_options
            .iter()
            .map(|o| o.parse::<CreationOption>())
            .collect::<ConvertResult<Vec<_>>>()?;

        Ok(ConversionParams {
            target_srs,
            source_srs,
            resampling,
            data_class,
            layer_name: self.field("layer_name").map(str::to_string),
            creation_options,
        })
    }
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> ConvertResult<String> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|e| ConvertError::invalid_input(format!("unreadable field '{name}': {}", e.body_text())))
}

fn multipart_error(err: MultipartError, limit: u64) -> ConvertError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ConvertError::PayloadTooLarge { limit }
    } else {
        ConvertError::invalid_input(format!("malformed multipart body: {}", err.body_text()))
    }
}
