//! The toggle value model: [`Variant`], [`Toggle`] and [`ToggleSet`].
//!
//! All three types are immutable once constructed. A [`ToggleSet`] is built in one go from an
//! ordered sequence of toggles and then only ever read; the currently-active set is published
//! through [`FlagStore`][crate::flag_store::FlagStore].

/// Payload attached to an enabled variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPayload {
    payload_type: String,
    value: String,
}

impl VariantPayload {
    /// Create a new payload.
    pub fn new(payload_type: impl Into<String>, value: impl Into<String>) -> VariantPayload {
        VariantPayload {
            payload_type: payload_type.into(),
            value: value.into(),
        }
    }

    /// The payload type, e.g. `"string"` or `"json"`.
    pub fn payload_type(&self) -> &str {
        &self.payload_type
    }

    /// The raw payload value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A variant selected by the server for a toggle.
///
/// The canonical disabled variant ([`Variant::disabled`]) is the universal fallback value:
/// lookups never return an absent variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    name: String,
    enabled: bool,
    payload: Option<VariantPayload>,
}

impl Variant {
    /// Create a new variant. A payload is only meaningful on an enabled variant; a payload passed
    /// alongside `enabled = false` is dropped.
    pub fn new(name: impl Into<String>, enabled: bool, payload: Option<VariantPayload>) -> Variant {
        Variant {
            name: name.into(),
            enabled,
            payload: if enabled { payload } else { None },
        }
    }

    /// The canonical disabled variant.
    pub fn disabled() -> Variant {
        Variant {
            name: "disabled".to_owned(),
            enabled: false,
            payload: None,
        }
    }

    /// Variant name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the variant is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Payload attached to the variant, if any.
    pub fn payload(&self) -> Option<&VariantPayload> {
        self.payload.as_ref()
    }
}

impl Default for Variant {
    fn default() -> Variant {
        Variant::disabled()
    }
}

/// A single feature toggle as evaluated by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toggle {
    name: String,
    enabled: bool,
    impression_data: bool,
    variant: Variant,
}

impl Toggle {
    /// Create a new toggle. `variant` defaults to the disabled variant when `None`.
    pub fn new(
        name: impl Into<String>,
        enabled: bool,
        impression_data: bool,
        variant: Option<Variant>,
    ) -> Toggle {
        Toggle {
            name: name.into(),
            enabled,
            impression_data,
            variant: variant.unwrap_or_default(),
        }
    }

    /// Toggle name. Non-empty, unique within a [`ToggleSet`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the toggle is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether impression events should be emitted for this toggle.
    pub fn impression_data(&self) -> bool {
        self.impression_data
    }

    /// The variant selected for this toggle.
    pub fn variant(&self) -> &Variant {
        &self.variant
    }
}

/// An immutable mapping from toggle name to [`Toggle`].
///
/// Construction from an ordered sequence is first-one-wins: when the same name appears twice, the
/// earlier entry is retained and later duplicates are discarded. Lookups of missing names return
/// safe defaults instead of errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToggleSet {
    toggles: std::collections::HashMap<String, Toggle>,
}

impl ToggleSet {
    /// Create an empty toggle set.
    pub fn new() -> ToggleSet {
        ToggleSet::default()
    }

    /// Number of unique toggle names in the set.
    pub fn len(&self) -> usize {
        self.toggles.len()
    }

    /// Whether the set contains no toggles.
    pub fn is_empty(&self) -> bool {
        self.toggles.is_empty()
    }

    /// Whether a toggle with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.toggles.contains_key(name)
    }

    /// Look up a toggle by name.
    pub fn get(&self, name: &str) -> Option<&Toggle> {
        self.toggles.get(name)
    }

    /// Whether the named toggle is enabled. Missing names are disabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|toggle| toggle.enabled())
    }

    /// The variant for the named toggle. Missing names yield the disabled variant.
    pub fn variant(&self, name: &str) -> Variant {
        self.get(name)
            .map(|toggle| toggle.variant().clone())
            .unwrap_or_else(Variant::disabled)
    }

    /// Whether impressions are requested for the named toggle. Missing names yield `false`.
    pub fn impression_data(&self, name: &str) -> bool {
        self.get(name).is_some_and(|toggle| toggle.impression_data())
    }
}

impl FromIterator<Toggle> for ToggleSet {
    fn from_iter<I: IntoIterator<Item = Toggle>>(iter: I) -> ToggleSet {
        let mut toggles = std::collections::HashMap::new();
        for toggle in iter {
            // First one wins: later duplicates are discarded.
            toggles.entry(toggle.name().to_owned()).or_insert(toggle);
        }
        ToggleSet { toggles }
    }
}
