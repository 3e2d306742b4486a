// Model registry (client model name → upstream payload profile)
// Author: kelexine (https://github.com/kelexine)

use crate::config::ModelEntry;
use crate::error::{ProxyError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Everything the upstream payload needs to know about a client-facing model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProfile {
    pub name: String,
    pub upstream_model: String,
    pub gizmo_id: Option<String>,
    /// Gizmo definition fetched from the upstream at startup.
    pub gizmo: Option<Value>,
}

impl ModelProfile {
    /// The `conversation_mode` object of the conversation payload.
    pub fn conversation_mode(&self) -> Value {
        match &self.gizmo_id {
            Some(gizmo_id) => {
                let mut mode = json!({
                    "kind": "gizmo_interaction",
                    "gizmo_id": gizmo_id,
                });
                if let Some(gizmo) = &self.gizmo {
                    mode["gizmo"] = gizmo.clone();
                }
                mode
            }
            None => json!({ "kind": "primary_assistant" }),
        }
    }

    /// Whether image parts of client messages are uploaded for this model.
    pub fn accepts_images(&self) -> bool {
        !self.upstream_model.starts_with("gpt-3.5")
            && self.upstream_model != "text-davinci-002-render-sha"
    }

    /// Upstream model slug; gizmo interactions always run on the gizmo model.
    pub fn payload_model(&self) -> &str {
        if self.gizmo_id.is_some() {
            "gpt-4-gizmo"
        } else {
            &self.upstream_model
        }
    }
}

/// Read-only lookup built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    profiles: HashMap<String, ModelProfile>,
    order: Vec<String>,
}

impl ModelRegistry {
    pub fn from_entries(entries: &[ModelEntry]) -> Result<Self> {
        let mut registry = Self::default();
        for entry in entries {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                return Err(ProxyError::Config("model name must not be empty".to_string()));
            }
            let profile = ModelProfile {
                name: name.clone(),
                upstream_model: entry.upstream_model.clone(),
                gizmo_id: entry.gizmo_id.clone().filter(|id| !id.is_empty()),
                gizmo: None,
            };
            if registry.profiles.insert(name.clone(), profile).is_some() {
                return Err(ProxyError::Config(format!("duplicate model name: {}", name)));
            }
            registry.order.push(name);
        }
        Ok(registry)
    }

    /// Resolve a client model name. Names are matched exactly.
    pub fn resolve(&self, name: &str) -> Result<&ModelProfile> {
        self.profiles.get(name).ok_or_else(|| {
            ProxyError::ModelNotAccessible(format!(
                "{} (available: {})",
                name,
                self.order.join(", ")
            ))
        })
    }

    /// Model names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// `(model name, gizmo id)` of every gizmo model, in configuration order.
    pub fn gizmo_models(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|name| {
                let profile = self.profiles.get(name)?;
                Some((name.clone(), profile.gizmo_id.clone()?))
            })
            .collect()
    }

    /// Store the fetched definition of a gizmo model.
    pub fn attach_gizmo(&mut self, name: &str, gizmo: Value) {
        if let Some(profile) = self.profiles.get_mut(name) {
            profile.gizmo = Some(gizmo);
        }
    }

    /// Drop a model so it is neither listed nor resolvable.
    pub fn remove(&mut self, name: &str) {
        if self.profiles.remove(name).is_some() {
            self.order.retain(|n| n != name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, upstream: &str, gizmo: Option<&str>) -> ModelEntry {
        ModelEntry {
            name: name.to_string(),
            upstream_model: upstream.to_string(),
            gizmo_id: gizmo.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_known_model() {
        let registry = ModelRegistry::from_entries(&[entry("gpt-4-s", "gpt-4", None)]).unwrap();
        let profile = registry.resolve("gpt-4-s").unwrap();
        assert_eq!(profile.payload_model(), "gpt-4");
        assert_eq!(profile.conversation_mode()["kind"], "primary_assistant");
    }

    #[test]
    fn test_unknown_model_is_not_accessible() {
        let registry = ModelRegistry::from_entries(&[entry("gpt-4-s", "gpt-4", None)]).unwrap();
        assert!(matches!(
            registry.resolve("GPT-4-S"),
            Err(ProxyError::ModelNotAccessible(_))
        ));
        assert!(registry.resolve("").is_err());
    }

    #[test]
    fn test_gizmo_profile() {
        let registry =
            ModelRegistry::from_entries(&[entry("writer", "gpt-4", Some("g-123"))]).unwrap();
        let profile = registry.resolve("writer").unwrap();
        assert_eq!(profile.payload_model(), "gpt-4-gizmo");
        let mode = profile.conversation_mode();
        assert_eq!(mode["kind"], "gizmo_interaction");
        assert_eq!(mode["gizmo_id"], "g-123");
        assert!(mode.get("gizmo").is_none());
    }

    #[test]
    fn test_gizmo_definition_and_removal() {
        let mut registry = ModelRegistry::from_entries(&[
            entry("gpt-4-s", "gpt-4", None),
            entry("writer", "gpt-4", Some("g-1")),
            entry("coder", "gpt-4", Some("g-2")),
        ])
        .unwrap();
        assert_eq!(
            registry.gizmo_models(),
            vec![
                ("writer".to_string(), "g-1".to_string()),
                ("coder".to_string(), "g-2".to_string())
            ]
        );

        registry.attach_gizmo("writer", serde_json::json!({"gizmo": {"id": "g-1"}}));
        registry.remove("coder");

        let mode = registry.resolve("writer").unwrap().conversation_mode();
        assert_eq!(mode["gizmo"]["gizmo"]["id"], "g-1");
        assert!(registry.resolve("coder").is_err());
        assert_eq!(registry.names(), ["gpt-4-s", "writer"]);
    }

    #[test]
    fn test_image_input_support() {
        let registry = ModelRegistry::from_entries(&[
            entry("fast", "text-davinci-002-render-sha", None),
            entry("vision", "gpt-4o", None),
        ])
        .unwrap();
        assert!(!registry.resolve("fast").unwrap().accepts_images());
        assert!(registry.resolve("vision").unwrap().accepts_images());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ModelRegistry::from_entries(&[
            entry("gpt-4", "gpt-4", None),
            entry(" gpt-4 ", "gpt-4o", None),
        ]);
        assert!(result.is_err());
    }
}
