use std::env;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_GEMINI_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-pro",
];

/// Runtime settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub gemini_models: Vec<String>,
    pub max_upload_bytes: usize,
    pub ocr: OcrConfig,
    pub extra_lab_units: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub enabled: bool,
    pub tesseract_path: String,
    /// Tesseract language code, e.g. `eng` or `eng+heb`.
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tesseract_path: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            gemini_api_key: None,
            gemini_models: DEFAULT_GEMINI_MODELS.iter().map(|m| m.to_string()).collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            ocr: OcrConfig::default(),
            extra_lab_units: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset or unparsable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let gemini_models = non_empty("GEMINI_MODELS")
            .map(|v| split_list(&v))
            .filter(|models| !models.is_empty())
            .unwrap_or(defaults.gemini_models);

        Self {
            port: non_empty("PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_models,
            max_upload_bytes: non_empty("MAX_UPLOAD_BYTES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_upload_bytes),
            ocr: OcrConfig {
                enabled: non_empty("OCR_ENABLED")
                    .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
                    .unwrap_or(defaults.ocr.enabled),
                tesseract_path: non_empty("TESSERACT_PATH").unwrap_or(defaults.ocr.tesseract_path),
                language: non_empty("OCR_LANGUAGE").unwrap_or(defaults.ocr.language),
            },
            extra_lab_units: non_empty("LAB_EXTRA_UNITS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.gemini_models[0], "gemini-2.0-flash");
        assert_eq!(config.max_upload_bytes, 16 * 1024 * 1024);
        assert!(config.ocr.enabled);
        assert_eq!(config.ocr.language, "eng");
        assert!(config.extra_lab_units.is_empty());
    }

    #[test]
    fn test_values_are_read_and_bad_numbers_ignored() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("GEMINI_API_KEY", "  "),
            ("GEMINI_MODELS", "gemini-2.5-flash, gemini-2.0-flash"),
            ("MAX_UPLOAD_BYTES", "1024"),
            ("OCR_ENABLED", "false"),
            ("OCR_LANGUAGE", "eng+heb"),
            ("LAB_EXTRA_UNITS", "nmol/min, ,mOsm/kg"),
        ]);

        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.gemini_models, vec!["gemini-2.5-flash", "gemini-2.0-flash"]);
        assert_eq!(config.max_upload_bytes, 1024);
        assert!(!config.ocr.enabled);
        assert_eq!(config.ocr.language, "eng+heb");
        assert_eq!(config.extra_lab_units, vec!["nmol/min", "mOsm/kg"]);
    }
}
