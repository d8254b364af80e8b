use std::{collections::BTreeMap, sync::OnceLock};

use regex_lite::Regex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("undefined variable `{variable}` in `{template}`")]
pub struct UndefinedVariable {
    pub variable: String,
    pub template: String,
}

/// Values substituted into `%(name)s` placeholders of argument, caveat and probe templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(BTreeMap<String, String>);

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"%\(([A-Za-z0-9_]+)\)s").unwrap())
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn expand(&self, template: &str) -> Result<String, UndefinedVariable> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for captures in placeholder().captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let value = self.get(name.as_str()).ok_or_else(|| UndefinedVariable {
                variable: name.as_str().to_string(),
                template: template.to_string(),
            })?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}
