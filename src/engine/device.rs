//! Device Update Requests
//!
//! Parses the headers sent by the ESP Arduino HTTP-update clients. Requests
//! missing any identification header are rejected before they reach the
//! release store.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::engine::release::version::VersionError;
use crate::engine::release::Version;

const ESP8266_HEADERS: &[&str] = &[
    "x-ESP8266-Chip-ID",
    "x-ESP8266-STA-MAC",
    "x-ESP8266-AP-MAC",
    "x-ESP8266-free-space",
    "x-ESP8266-sketch-size",
    "x-ESP8266-sketch-md5",
    "x-ESP8266-chip-size",
    "x-ESP8266-sdk-version",
];

const ESP32_HEADERS: &[&str] = &[
    "x-ESP32-STA-MAC",
    "x-ESP32-AP-MAC",
    "x-ESP32-free-space",
    "x-ESP32-sketch-size",
    "x-ESP32-sketch-md5",
    "x-ESP32-chip-size",
    "x-ESP32-sdk-version",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Esp8266,
    Esp32,
}

impl DeviceClass {
    pub fn from_user_agent(user_agent: &str) -> Option<Self> {
        match user_agent {
            "ESP8266-http-Update" => Some(Self::Esp8266),
            "ESP32-http-Update" => Some(Self::Esp32),
            _ => None,
        }
    }

    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::Esp8266 => "ESP8266-http-Update",
            Self::Esp32 => "ESP32-http-Update",
        }
    }

    /// Identification headers that must be present (values are not checked)
    pub fn required_headers(&self) -> &'static [&'static str] {
        match self {
            Self::Esp8266 => ESP8266_HEADERS,
            Self::Esp32 => ESP32_HEADERS,
        }
    }

    pub fn version_header(&self) -> &'static str {
        match self {
            Self::Esp8266 => "x-ESP8266-version",
            Self::Esp32 => "x-ESP32-version",
        }
    }

    pub fn mode_header(&self) -> &'static str {
        match self {
            Self::Esp8266 => "x-ESP8266-mode",
            Self::Esp32 => "x-ESP32-mode",
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Esp8266 => write!(f, "ESP8266"),
            Self::Esp32 => write!(f, "ESP32"),
        }
    }
}

/// Which image the device wants to flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Firmware,
    Filesystem,
}

impl ImageKind {
    /// `spiffs` selects the filesystem image, anything else the firmware.
    pub fn from_mode(mode: &str) -> Self {
        if mode == "spiffs" {
            Self::Filesystem
        } else {
            Self::Firmware
        }
    }
}

/// Names of the served images inside a release directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub firmware: String,
    pub filesystem: String,
    /// Put the release version into the attachment name
    pub version_in_filename: bool,
}

impl Artifacts {
    /// `<repo>_firmware.bin` and `<repo>_spiffs.bin`
    pub fn for_repo(repo: &str) -> Self {
        Self {
            firmware: format!("{}_firmware.bin", repo),
            filesystem: format!("{}_spiffs.bin", repo),
            version_in_filename: true,
        }
    }

    pub fn file_name(&self, kind: ImageKind) -> &str {
        match kind {
            ImageKind::Firmware => &self.firmware,
            ImageKind::Filesystem => &self.filesystem,
        }
    }

    /// `Widget_firmware.bin` at `v1.2.0` -> `Widget_firmware_v1.2.0.bin`
    pub fn attachment_name(&self, kind: ImageKind, version: &Version) -> String {
        let file_name = self.file_name(kind);
        if !self.version_in_filename {
            return file_name.to_string();
        }
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, version, ext),
            _ => format!("{}_{}", file_name, version),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdateRequest {
    pub class: DeviceClass,
    pub current_version: Version,
    pub kind: ImageKind,
}

#[derive(Error, Debug)]
pub enum RequestRejection {
    #[error("Invalid User-Agent header: {0:?}")]
    UnknownDevice(Option<String>),
    #[error("Missing {class} header {header}")]
    MissingHeader { class: DeviceClass, header: &'static str },
    #[error("Invalid current version: {0}")]
    InvalidVersion(#[from] VersionError),
}

impl IntoResponse for RequestRejection {
    fn into_response(self) -> Response {
        warn!("Rejecting update request: {}", self);
        StatusCode::FORBIDDEN.into_response()
    }
}

impl DeviceUpdateRequest {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, RequestRejection> {
        let user_agent = header_str(headers, "user-agent");
        let class = user_agent
            .and_then(DeviceClass::from_user_agent)
            .ok_or_else(|| RequestRejection::UnknownDevice(user_agent.map(str::to_string)))?;

        if let Some(header) = class
            .required_headers()
            .iter()
            .copied()
            .find(|name| !headers.contains_key(*name))
        {
            return Err(RequestRejection::MissingHeader { class, header });
        }

        let version = require(headers, class, class.version_header())?;
        let mode = require(headers, class, class.mode_header())?;

        Ok(Self {
            class,
            current_version: Version::parse(version.trim())?,
            kind: ImageKind::from_mode(mode.trim()),
        })
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn require<'h>(
    headers: &'h HeaderMap,
    class: DeviceClass,
    header: &'static str,
) -> Result<&'h str, RequestRejection> {
    header_str(headers, header).ok_or(RequestRejection::MissingHeader { class, header })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn set(headers: &mut HeaderMap, name: &str, value: &str) {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    fn esp8266_headers(version: &str, mode: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        set(&mut headers, "user-agent", "ESP8266-http-Update");
        for name in ESP8266_HEADERS {
            set(&mut headers, name, "0");
        }
        set(&mut headers, "x-ESP8266-version", version);
        set(&mut headers, "x-ESP8266-mode", mode);
        headers
    }

    #[test]
    fn test_parse_esp8266_request() {
        let headers = esp8266_headers("1.1.0", "sketch");
        let request = DeviceUpdateRequest::from_headers(&headers).unwrap();
        assert_eq!(request.class, DeviceClass::Esp8266);
        assert_eq!(request.current_version, Version::parse("1.1.0").unwrap());
        assert_eq!(request.kind, ImageKind::Firmware);
    }

    #[test]
    fn test_spiffs_mode_selects_filesystem() {
        let headers = esp8266_headers("1.1.0", "spiffs");
        let request = DeviceUpdateRequest::from_headers(&headers).unwrap();
        assert_eq!(request.kind, ImageKind::Filesystem);
    }

    #[test]
    fn test_missing_chip_id_is_rejected() {
        let mut headers = esp8266_headers("1.1.0", "sketch");
        headers.remove("x-ESP8266-Chip-ID");
        let err = DeviceUpdateRequest::from_headers(&headers).unwrap_err();
        assert!(matches!(err, RequestRejection::MissingHeader { header: "x-ESP8266-Chip-ID", .. }));
    }

    #[test]
    fn test_missing_version_and_mode_are_rejected() {
        let mut headers = esp8266_headers("1.1.0", "sketch");
        headers.remove("x-ESP8266-version");
        assert!(DeviceUpdateRequest::from_headers(&headers).is_err());

        let mut headers = esp8266_headers("1.1.0", "sketch");
        headers.remove("x-ESP8266-mode");
        assert!(DeviceUpdateRequest::from_headers(&headers).is_err());
    }

    #[test]
    fn test_unparseable_version_is_rejected() {
        let headers = esp8266_headers("latest", "sketch");
        let err = DeviceUpdateRequest::from_headers(&headers).unwrap_err();
        assert!(matches!(err, RequestRejection::InvalidVersion(_)));
    }

    #[test]
    fn test_unknown_user_agent_is_rejected() {
        let mut headers = esp8266_headers("1.1.0", "sketch");
        set(&mut headers, "user-agent", "curl/8.0");
        assert!(matches!(
            DeviceUpdateRequest::from_headers(&headers),
            Err(RequestRejection::UnknownDevice(Some(_)))
        ));

        headers.remove("user-agent");
        assert!(matches!(
            DeviceUpdateRequest::from_headers(&headers),
            Err(RequestRejection::UnknownDevice(None))
        ));
    }

    #[test]
    fn test_attachment_names() {
        let mut artifacts = Artifacts::for_repo("Widget");
        let version = Version::parse("v1.2.0").unwrap();
        assert_eq!(
            artifacts.attachment_name(ImageKind::Firmware, &version),
            "Widget_firmware_v1.2.0.bin"
        );
        assert_eq!(
            artifacts.attachment_name(ImageKind::Filesystem, &version),
            "Widget_spiffs_v1.2.0.bin"
        );

        artifacts.version_in_filename = false;
        assert_eq!(artifacts.attachment_name(ImageKind::Firmware, &version), "Widget_firmware.bin");

        artifacts.firmware = "firmware".to_string();
        artifacts.version_in_filename = true;
        assert_eq!(artifacts.attachment_name(ImageKind::Firmware, &version), "firmware_v1.2.0");
    }

    #[test]
    fn test_esp32_has_no_chip_id() {
        let mut headers = HeaderMap::new();
        set(&mut headers, "user-agent", "ESP32-http-Update");
        for name in ESP32_HEADERS {
            set(&mut headers, name, "0");
        }
        set(&mut headers, "x-ESP32-version", "v2.0");
        set(&mut headers, "x-ESP32-mode", "sketch");

        let request = DeviceUpdateRequest::from_headers(&headers).unwrap();
        assert_eq!(request.class, DeviceClass::Esp32);
        assert_eq!(request.current_version, Version::parse("2.0.0").unwrap());
    }
}
