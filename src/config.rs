use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LLMConfig,
    pub services: ServicesConfig,
    pub model_specs: ModelSpecs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub groq_api_key: String,
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub api_base: Option<String>,
    pub timeout_secs: u64,
}

impl LLMConfig {
    /// API key for the currently selected provider, if one is configured.
    pub fn active_api_key(&self) -> Option<String> {
        let key = match self.provider.as_str() {
            "groq" => &self.groq_api_key,
            "gemini" => &self.gemini_api_key,
            _ => &self.openai_api_key,
        };
        if key.is_empty() {
            None
        } else {
            Some(key.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    pub prediction_base_url: String,
    pub report_base_url: String,
    pub timeout_secs: u64,
}

/// Specification of one external prediction model: the parameters it
/// requires and the tool name used to invoke it.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub required_parameters: Vec<String>,
    pub tool: String,
    #[serde(default)]
    pub description: String,
}

/// Registry of known prediction models, loaded once at startup and
/// read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ModelSpecs {
    models: BTreeMap<String, ModelSpec>,
}

impl ModelSpecs {
    /// Load the registry from a JSON document mapping model id to spec.
    pub fn from_json(json: &str) -> Result<Self> {
        let specs: ModelSpecs = serde_json::from_str(json)?;
        Ok(specs)
    }

    /// Load from a file if a path is given, otherwise use the built-in
    /// cardiovascular/diabetes defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                Self::from_json(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelSpec> {
        self.models.get(model_id)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelSpec)> {
        self.models.iter()
    }
}

impl Default for ModelSpecs {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "cardiovascular_risk".to_string(),
            ModelSpec {
                required_parameters: [
                    "age",
                    "gender",
                    "height",
                    "weight",
                    "ap_hi",
                    "ap_lo",
                    "cholesterol",
                    "gluc",
                    "smoke",
                    "alco",
                    "active",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                tool: "Predict_Cardiovascular_Risk_With_Explanation".to_string(),
                description: "XGBoost cardiovascular disease risk model with SHAP explanations"
                    .to_string(),
            },
        );
        models.insert(
            "diabetes_risk".to_string(),
            ModelSpec {
                required_parameters: [
                    "gender",
                    "age",
                    "hypertension",
                    "heart_disease",
                    "smoking_history",
                    "bmi",
                    "HbA1c_level",
                    "blood_glucose_level",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                tool: "Predict_Diabetes_Risk_With_Explanation".to_string(),
                description: "XGBoost diabetes risk model with SHAP explanations".to_string(),
            },
        );
        Self { models }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            llm: LLMConfig {
                provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "groq".to_string()),
                model: env::var("LLM_MODEL")
                    .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
                groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
                gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                api_base: env::var("LLM_API_BASE").ok(),
                timeout_secs: env::var("LLM_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
            services: ServicesConfig {
                prediction_base_url: env::var("PREDICTION_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8001".to_string()),
                report_base_url: env::var("REPORT_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8002".to_string()),
                timeout_secs: env::var("SERVICE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
            },
            model_specs: ModelSpecs::load(env::var("MODEL_SPECS_PATH").ok().as_deref())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_specs_contain_both_models() {
        let specs = ModelSpecs::default();
        assert!(specs.contains("cardiovascular_risk"));
        assert!(specs.contains("diabetes_risk"));

        let cardio = specs.get("cardiovascular_risk").unwrap();
        assert_eq!(cardio.required_parameters.len(), 11);
        assert_eq!(cardio.tool, "Predict_Cardiovascular_Risk_With_Explanation");
        assert!(cardio.required_parameters.iter().any(|p| p == "ap_hi"));
    }

    #[test]
    fn test_specs_from_json() {
        let json = r#"{
            "stroke_risk": {
                "required_parameters": ["age", "bmi"],
                "tool": "Predict_Stroke_Risk",
                "description": "stroke model"
            }
        }"#;
        let specs = ModelSpecs::from_json(json).unwrap();
        assert!(specs.contains("stroke_risk"));
        assert!(!specs.contains("cardiovascular_risk"));
        assert_eq!(specs.get("stroke_risk").unwrap().required_parameters, vec!["age", "bmi"]);
    }

    #[test]
    fn test_unknown_model_lookup_is_none() {
        let specs = ModelSpecs::default();
        assert!(specs.get("liver_risk").is_none());
    }
}
