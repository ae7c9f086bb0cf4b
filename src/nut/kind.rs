//! Content types of nuts.
//!
//! A closed set: every resolved path must map to one of these by extension.

use serde::{Deserialize, Serialize};
use std::fmt;

/// MIME type constants served for each content type.
pub mod mime {
    pub const HTML: &str = "text/html; charset=utf-8";
    pub const CSS: &str = "text/css; charset=utf-8";
    pub const JAVASCRIPT: &str = "text/javascript; charset=utf-8";
    pub const TYPESCRIPT: &str = "text/typescript; charset=utf-8";
    pub const JSON: &str = "application/json";
    pub const PNG: &str = "image/png";
    pub const JPEG: &str = "image/jpeg";
    pub const GIF: &str = "image/gif";
    pub const SVG: &str = "image/svg+xml";
    pub const ICO: &str = "image/x-icon";
    pub const WOFF: &str = "font/woff";
    pub const WOFF2: &str = "font/woff2";
    pub const TTF: &str = "font/ttf";
    pub const OTF: &str = "font/otf";
    pub const EOT: &str = "application/vnd.ms-fontobject";
}

/// Content type of a nut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NutType {
    Html,
    Css,
    Javascript,
    Typescript,
    /// Source map.
    Map,
    Json,
    Png,
    Jpeg,
    Gif,
    Svg,
    Ico,
    Woff,
    Woff2,
    Ttf,
    Otf,
    Eot,
}

impl NutType {
    pub const ALL: [NutType; 16] = [
        Self::Html,
        Self::Css,
        Self::Javascript,
        Self::Typescript,
        Self::Map,
        Self::Json,
        Self::Png,
        Self::Jpeg,
        Self::Gif,
        Self::Svg,
        Self::Ico,
        Self::Woff,
        Self::Woff2,
        Self::Ttf,
        Self::Otf,
        Self::Eot,
    ];

    /// File extensions (without dot) mapped to this type.
    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Html => &["html", "htm"],
            Self::Css => &["css"],
            Self::Javascript => &["js", "mjs"],
            Self::Typescript => &["ts"],
            Self::Map => &["map"],
            Self::Json => &["json"],
            Self::Png => &["png"],
            Self::Jpeg => &["jpg", "jpeg"],
            Self::Gif => &["gif"],
            Self::Svg => &["svg"],
            Self::Ico => &["ico"],
            Self::Woff => &["woff"],
            Self::Woff2 => &["woff2"],
            Self::Ttf => &["ttf"],
            Self::Otf => &["otf"],
            Self::Eot => &["eot"],
        }
    }

    /// Canonical extension, used when naming derived nuts.
    pub const fn extension(self) -> &'static str {
        self.extensions()[0]
    }

    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Html => mime::HTML,
            Self::Css => mime::CSS,
            Self::Javascript => mime::JAVASCRIPT,
            Self::Typescript => mime::TYPESCRIPT,
            Self::Map | Self::Json => mime::JSON,
            Self::Png => mime::PNG,
            Self::Jpeg => mime::JPEG,
            Self::Gif => mime::GIF,
            Self::Svg => mime::SVG,
            Self::Ico => mime::ICO,
            Self::Woff => mime::WOFF,
            Self::Woff2 => mime::WOFF2,
            Self::Ttf => mime::TTF,
            Self::Otf => mime::OTF,
            Self::Eot => mime::EOT,
        }
    }

    /// Whether content of this type is text (and can be aggregated as text).
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            Self::Html | Self::Css | Self::Javascript | Self::Typescript | Self::Map | Self::Json
        )
    }

    /// Look up a type by extension, case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.extensions().contains(&ext.as_str()))
    }

    /// Look up a type from a nut name (`js/app.min.js` → `Javascript`).
    pub fn from_name(name: &str) -> Option<Self> {
        let file = name.rsplit('/').next().unwrap_or(name);
        let (_, ext) = file.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

impl fmt::Display for NutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}
