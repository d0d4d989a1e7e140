//! The evaluation context sent to the server with every features request.

use chrono::SecondsFormat;
use rand::Rng;

/// Default application name used when an empty one is supplied.
pub(crate) const DEFAULT_APP_NAME: &str = "unleash-client-app";

/// Context keys that carry dedicated fields and cannot be used as custom property names.
pub fn is_reserved_property_key(key: &str) -> bool {
    matches!(
        key,
        "appName" | "environment" | "userId" | "sessionId" | "remoteAddress" | "currentTime"
    )
}

/// Evaluation attributes describing the current application session and user.
///
/// `app_name` and `session_id` are always present; an empty `app_name` falls back to
/// [`DEFAULT_APP_NAME`] and an empty `session_id` is replaced by a randomly generated one.
/// Optional fields are omitted from the wire encoding entirely when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    app_name: String,
    environment: Option<String>,
    session_id: String,
    user_id: Option<String>,
    remote_address: Option<String>,
    current_time: Option<String>,
    properties: Vec<(String, String)>,
}

impl Context {
    /// Create a new context. Empty `environment` means "not set"; empty `session_id` generates a
    /// random numeric one.
    pub fn new(app_name: &str, environment: &str, session_id: &str) -> Context {
        let app_name = if app_name.is_empty() {
            log::debug!(target: "unleash", "empty app name, falling back to {DEFAULT_APP_NAME:?}");
            DEFAULT_APP_NAME.to_owned()
        } else {
            app_name.to_owned()
        };
        let session_id = if session_id.is_empty() {
            generate_session_id()
        } else {
            session_id.to_owned()
        };

        Context {
            app_name,
            environment: (!environment.is_empty()).then(|| environment.to_owned()),
            session_id,
            user_id: None,
            remote_address: None,
            current_time: None,
            properties: Vec::new(),
        }
    }

    /// Application name.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Environment name, if set.
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// Session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// User identifier, if set.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Remote address, if set.
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    /// Evaluation timestamp, if set. ISO-8601 text.
    pub fn current_time(&self) -> Option<&str> {
        self.current_time.as_deref()
    }

    /// Custom properties in insertion order.
    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    /// Set the user id. An empty value clears it.
    pub fn set_user_id(&mut self, user_id: &str) -> &mut Context {
        self.user_id = (!user_id.is_empty()).then(|| user_id.to_owned());
        self
    }

    /// Set the remote address. An empty value clears it.
    pub fn set_remote_address(&mut self, remote_address: &str) -> &mut Context {
        self.remote_address = (!remote_address.is_empty()).then(|| remote_address.to_owned());
        self
    }

    /// Set the evaluation timestamp. An empty value clears it.
    pub fn set_current_time(&mut self, current_time: &str) -> &mut Context {
        self.current_time = (!current_time.is_empty()).then(|| current_time.to_owned());
        self
    }

    /// Stamp the context with the current local time in ISO-8601 format.
    pub fn set_current_time_now(&mut self) -> &mut Context {
        self.current_time =
            Some(chrono::Local::now().to_rfc3339_opts(SecondsFormat::Secs, false));
        self
    }

    /// Set a custom property. Empty and reserved keys are silently ignored; setting an existing
    /// key updates it in place, preserving insertion order.
    pub fn set_property(&mut self, key: &str, value: &str) -> &mut Context {
        if key.is_empty() {
            return self;
        }
        if is_reserved_property_key(key) {
            log::debug!(target: "unleash", "ignoring reserved context property key {key:?}");
            return self;
        }
        if let Some(entry) = self.properties.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_owned();
        } else {
            self.properties.push((key.to_owned(), value.to_owned()));
        }
        self
    }
}

fn generate_session_id() -> String {
    rand::thread_rng().gen_range(1..=1_000_000_000u32).to_string()
}

#[cfg(test)]
mod tests {
    use super::{Context, DEFAULT_APP_NAME};

    #[test]
    fn empty_app_name_falls_back_to_default() {
        let context = Context::new("", "production", "session-1");

        assert_eq!(context.app_name(), DEFAULT_APP_NAME);
        assert_eq!(context.environment(), Some("production"));
        assert_eq!(context.session_id(), "session-1");
    }

    #[test]
    fn empty_session_id_is_generated() {
        let context = Context::new("my-app", "", "");

        assert!(!context.session_id().is_empty());
        assert!(context.session_id().parse::<u32>().is_ok());
        assert_eq!(context.environment(), None);
    }

    #[test]
    fn empty_values_clear_optional_fields() {
        let mut context = Context::new("my-app", "dev", "s");
        context.set_user_id("user-1").set_remote_address("10.0.0.1");

        assert_eq!(context.user_id(), Some("user-1"));
        assert_eq!(context.remote_address(), Some("10.0.0.1"));

        context.set_user_id("").set_remote_address("");

        assert_eq!(context.user_id(), None);
        assert_eq!(context.remote_address(), None);
    }

    #[test]
    fn reserved_and_empty_property_keys_are_ignored() {
        let mut context = Context::new("my-app", "dev", "s");
        context
            .set_property("userId", "nope")
            .set_property("", "nope")
            .set_property("plan", "premium");

        assert_eq!(context.properties(), &[("plan".to_owned(), "premium".to_owned())]);
    }

    #[test]
    fn setting_an_existing_property_updates_in_place() {
        let mut context = Context::new("my-app", "dev", "s");
        context
            .set_property("plan", "free")
            .set_property("region", "eu")
            .set_property("plan", "premium");

        assert_eq!(
            context.properties(),
            &[
                ("plan".to_owned(), "premium".to_owned()),
                ("region".to_owned(), "eu".to_owned()),
            ]
        );
    }
}
