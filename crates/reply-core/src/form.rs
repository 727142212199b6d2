use serde::Deserialize;

use crate::codec::{format_buttons, format_keywords, parse_buttons, parse_keywords};
use crate::config::LimitsConfig;
use crate::error::ReplyError;
use crate::limits::{check_form_fields, check_keywords, clamp_buttons, LimitViolation};
use crate::model::BotConfig;

/// Raw fields posted by the admin editor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigForm {
    #[serde(default)]
    pub welcome_message: String,
    #[serde(default)]
    pub default_reply: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub buttons: String,
}

#[derive(Debug, Clone)]
pub struct FormOutcome {
    pub config: BotConfig,
    /// Caps that were exceeded but not enforced.
    pub warnings: Vec<LimitViolation>,
}

impl ConfigForm {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            welcome_message: config.welcome_message.clone(),
            default_reply: config.default_reply.clone(),
            keywords: format_keywords(&config.keywords),
            buttons: format_buttons(&config.buttons),
        }
    }

    /// Builds the next config from this form on top of `current`.
    ///
    /// Blank welcome/default reply keep the current value and an empty button
    /// list keeps the current buttons. The keyword field replaces the map.
    pub fn apply(&self, current: &BotConfig, limits: &LimitsConfig) -> Result<FormOutcome, ReplyError> {
        let mut warnings = check_form_fields(
            &self.welcome_message,
            &self.default_reply,
            &self.keywords,
            &self.buttons,
            limits,
        );
        if limits.enforce && !warnings.is_empty() {
            let detail = warnings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("；");
            return Err(ReplyError::LimitExceeded(detail));
        }

        let welcome_message = keep_if_blank(&self.welcome_message, &current.welcome_message);
        let default_reply = keep_if_blank(&self.default_reply, &current.default_reply);

        let keywords = parse_keywords(&self.keywords);
        warnings.extend(check_keywords(&keywords, limits));

        let mut buttons = clamp_buttons(parse_buttons(&self.buttons), limits);
        if buttons.is_empty() {
            buttons = current.buttons.clone();
        }

        Ok(FormOutcome {
            config: BotConfig {
                welcome_message,
                default_reply,
                keywords,
                buttons,
            },
            warnings,
        })
    }
}

fn keep_if_blank(submitted: &str, current: &str) -> String {
    if submitted.trim().is_empty() {
        current.to_string()
    } else {
        submitted.to_string()
    }
}
