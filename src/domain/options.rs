//! Observer options: the caller-facing init dictionary and its validated form.

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigurationError;
use crate::domain::record::{Change, ChangeKind};

/// Options as supplied by the caller. Absent keys stay `None`, which matters
/// for the implicit `attributes` / `characterData` rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObserverInit {
    pub child_list: Option<bool>,
    pub subtree: Option<bool>,
    pub attributes: Option<bool>,
    pub attribute_old_value: Option<bool>,
    pub attribute_filter: Option<Vec<String>>,
    pub character_data: Option<bool>,
    pub character_data_old_value: Option<bool>,
}

impl ObserverInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_list(mut self, value: bool) -> Self {
        self.child_list = Some(value);
        self
    }

    pub fn subtree(mut self, value: bool) -> Self {
        self.subtree = Some(value);
        self
    }

    pub fn attributes(mut self, value: bool) -> Self {
        self.attributes = Some(value);
        self
    }

    pub fn attribute_old_value(mut self, value: bool) -> Self {
        self.attribute_old_value = Some(value);
        self
    }

    pub fn attribute_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_filter = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn character_data(mut self, value: bool) -> Self {
        self.character_data = Some(value);
        self
    }

    pub fn character_data_old_value(mut self, value: bool) -> Self {
        self.character_data_old_value = Some(value);
        self
    }
}

/// Validated registration options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserverOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub attributes: bool,
    pub attribute_old_value: bool,
    pub attribute_filter: Option<Vec<String>>,
    pub character_data: bool,
    pub character_data_old_value: bool,
}

impl TryFrom<&ObserverInit> for ObserverOptions {
    type Error = ConfigurationError;

    /// Applies the implicit-interest rules:
    /// - `attributes` defaults to true when `attributeOldValue` or `attributeFilter` is given
    /// - `characterData` defaults to true when `characterDataOldValue` is given
    /// - an explicit `false` alongside those keys is an error
    fn try_from(init: &ObserverInit) -> Result<Self, Self::Error> {
        let attributes = init
            .attributes
            .unwrap_or(init.attribute_old_value.is_some() || init.attribute_filter.is_some());
        let character_data = init
            .character_data
            .unwrap_or(init.character_data_old_value.is_some());

        if !attributes
            && (init.attribute_old_value == Some(true) || init.attribute_filter.is_some())
        {
            return Err(ConfigurationError::AttributeOptionsWithoutAttributes);
        }
        if !character_data && init.character_data_old_value == Some(true) {
            return Err(ConfigurationError::CharacterDataOldValueWithoutCharacterData);
        }

        Ok(Self {
            child_list: init.child_list.unwrap_or(false),
            subtree: init.subtree.unwrap_or(false),
            attributes,
            attribute_old_value: init.attribute_old_value.unwrap_or(false),
            attribute_filter: init.attribute_filter.clone(),
            character_data,
            character_data_old_value: init.character_data_old_value.unwrap_or(false),
        })
    }
}

impl ObserverOptions {
    /// Whether a change of this shape is of interest, ignoring scope.
    ///
    /// The attribute filter only ever matches attributes without a namespace.
    pub fn matches(&self, change: &Change) -> bool {
        match change {
            Change::ChildList { .. } => self.child_list,
            Change::CharacterData { .. } => self.character_data,
            Change::Attributes {
                name, namespace, ..
            } => {
                self.attributes
                    && match &self.attribute_filter {
                        Some(filter) => namespace.is_none() && filter.iter().any(|f| f == name),
                        None => true,
                    }
            }
        }
    }

    pub fn wants_old_value(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Attributes => self.attribute_old_value,
            ChangeKind::CharacterData => self.character_data_old_value,
            ChangeKind::ChildList => false,
        }
    }
}
