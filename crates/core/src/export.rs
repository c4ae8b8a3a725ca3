//! Patient staging files.
//!
//! Retrieved patients are written to a CSV file per record set, one row per patient, so the
//! match engine can read them.
//!
//! Row layout:
//! - full identity URL of the record
//! - logical id
//! - identifier value per staged identifier system
//! - `text`, `family`, `suffix` and `given` for each staged name use
//! - gender and birth date
//! - mobile phone, then phone and email for work and home
//!
//! A patient without a name for a given use gets an empty block of the same width, so every
//! row has as many columns as the header. Every non-numeric field is written double-quoted,
//! with embedded quotes doubled, so separators inside values never shift a column.

use crate::config::FullUrlFormat;
use crate::retriever::PageSink;
use crate::PtmatchResult;
use fhir::{HumanName, Patient, Resource};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

const IDENTIFIER_SYSTEMS: [&str; 1] = ["SSN"];
const NAME_USES: [&str; 3] = ["", "official", "usual"];
const NAME_PARTS: [&str; 4] = ["text", "family", "suffix", "given"];
const TELECOM_SYSTEMS: [&str; 2] = ["phone", "email"];
const TELECOM_USES: [&str; 2] = ["work", "home"];

// ============================================================================
// Row format
// ============================================================================

/// CSV layout of a staged patient.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatientCsvFormat;

impl PatientCsvFormat {
    /// Column titles, including the leading `fullUrl` column.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec!["fullUrl".to_string(), "id".to_string()];

        for system in IDENTIFIER_SYSTEMS {
            headers.push(format!("identifier_{system}"));
        }

        for name_use in NAME_USES {
            for part in NAME_PARTS {
                headers.push(format!("name_{name_use}_{part}"));
            }
        }

        headers.push("gender".into());
        headers.push("DOB".into());
        headers.push("telecom_phone_mobile".into());

        for system in TELECOM_SYSTEMS {
            for use_type in TELECOM_USES {
                headers.push(format!("telecom_{system}_{use_type}"));
            }
        }

        headers
    }

    /// Fields of one row, unescaped.
    pub fn row(&self, full_url: &str, patient: &Patient) -> Vec<String> {
        let mut row = Vec::with_capacity(self.headers().len());

        row.push(full_url.to_string());
        row.push(patient.id.clone().unwrap_or_default());

        for system in IDENTIFIER_SYSTEMS {
            row.push(
                patient
                    .identifier_value(system)
                    .map(str::to_string)
                    .unwrap_or_default(),
            );
        }

        for name_use in NAME_USES {
            match patient.name_by_use(name_use) {
                Some(name) => row.extend(NAME_PARTS.iter().map(|part| name_part(name, part).to_string())),
                None => row.extend(NAME_PARTS.iter().map(|_| String::new())),
            }
        }

        row.push(patient.gender.clone().unwrap_or_default());
        row.push(patient.birth_date.clone().unwrap_or_default());

        row.push(telecom_value(patient, "phone", "mobile"));
        for system in TELECOM_SYSTEMS {
            for use_type in TELECOM_USES {
                row.push(telecom_value(patient, system, use_type));
            }
        }

        row
    }
}

fn name_part<'a>(name: &'a HumanName, part: &str) -> &'a str {
    let first = |values: &'a [String]| values.first().map(String::as_str).unwrap_or_default();
    match part {
        "text" => name.text.as_deref().unwrap_or_default(),
        "family" => first(&name.family),
        "suffix" => first(&name.suffix),
        "given" => first(&name.given),
        _ => "",
    }
}

fn telecom_value(patient: &Patient, system: &str, use_type: &str) -> String {
    patient
        .contact_point(system, use_type)
        .and_then(|c| c.value.clone())
        .unwrap_or_default()
}

/// Full identity URL of a record on `server_base`.
///
/// The versioned layout falls back to the simple one when the record carries no version.
pub fn full_url(server_base: &str, patient: &Patient, format: FullUrlFormat) -> String {
    let base = if server_base.ends_with('/') {
        server_base.to_string()
    } else {
        format!("{server_base}/")
    };
    let id = patient.id.as_deref().unwrap_or_default();

    match (format, patient.version_id()) {
        (FullUrlFormat::Versioned, Some(version)) => {
            format!("{base}Patient/{id}/_history/{version}")
        }
        _ => format!("{base}Patient/{id}"),
    }
}

// ============================================================================
// Exporter
// ============================================================================

/// Appends retrieved pages of patients to one staging file.
#[derive(Debug)]
pub struct CsvExporter {
    path: PathBuf,
    server_base: String,
    url_format: FullUrlFormat,
    format: PatientCsvFormat,
}

impl CsvExporter {
    pub fn new(path: impl Into<PathBuf>, server_base: impl Into<String>, url_format: FullUrlFormat) -> Self {
        Self {
            path: path.into(),
            server_base: server_base.into(),
            url_format,
            format: PatientCsvFormat,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `resources` to the staging file.
    ///
    /// The header is written whenever the file is new or empty, so a retrieval whose first
    /// pages carry no records still stages a header above its first row. An empty slice leaves
    /// the filesystem untouched.
    ///
    /// # Returns
    ///
    /// Number of patient rows written.
    ///
    /// # Errors
    ///
    /// Returns an I/O or CSV error if the file cannot be opened or written.
    pub fn write(&self, resources: &[Resource]) -> PtmatchResult<usize> {
        if resources.is_empty() {
            return Ok(0);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let is_empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(false)
            .quote_style(csv::QuoteStyle::NonNumeric)
            .from_writer(file);

        if is_empty {
            writer.write_record(self.format.headers())?;
        }

        let mut written = 0;
        for resource in resources {
            let Resource::Patient(patient) = resource else {
                tracing::error!("Unsupported Resource Type: {}", resource.resource_type());
                continue;
            };

            let url = full_url(&self.server_base, patient, self.url_format);
            tracing::trace!("staging {}", url);
            writer.write_record(self.format.row(&url, patient))?;
            written += 1;
        }

        writer.flush()?;
        Ok(written)
    }
}

impl PageSink for CsvExporter {
    fn write_page(&mut self, resources: &[Resource]) -> PtmatchResult<usize> {
        self.write(resources)
    }
}
