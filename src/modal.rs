//! Modal state carried in URL query parameters
//!
//! Detail and edit overlays are addressable: the open modal and the entity
//! it shows live in the query string, so refresh and back/forward land on
//! the same view. A [`ModalResolver`] owns the two parameter names for one
//! screen and translates both ways between URLs and [`ModalState`].
//!
//! Updates touch only the resolver's own parameters. Every other query
//! segment passes through byte for byte, percent-encoding included, so
//! unrelated state (filters, tabs, tokens) survives opening and closing
//! modals unchanged.

use crate::config::ModalSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use url::form_urlencoded;
use url::Url;

/// Query parameter naming the open modal
pub const MODAL_PARAM: &str = "modal";

/// Which modal a screen is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalMode {
    /// Read-only detail view of one entity
    Details,
    /// Edit form for one entity
    Edit,
    /// Creation form, not tied to an existing entity
    Create,
}

impl ModalMode {
    /// Value written into the modal query parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            Self::Details => "details",
            Self::Edit => "edit",
            Self::Create => "create",
        }
    }

    /// Parse a query parameter value; unrecognized values mean no modal
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "details" => Some(Self::Details),
            "edit" => Some(Self::Edit),
            "create" => Some(Self::Create),
            _ => None,
        }
    }
}

impl fmt::Display for ModalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_param())
    }
}

/// What the URL says the screen's modal is doing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModalState {
    /// Open modal, if the modal parameter held a recognized value
    pub mode: Option<ModalMode>,

    /// Entity the modal addresses, decoded
    pub entity_id: Option<String>,
}

impl ModalState {
    /// State with no modal open
    pub fn closed() -> Self {
        Self::default()
    }

    /// Whether a modal should render.
    ///
    /// Details and edit need an entity id to point at; create stands alone.
    /// A mode without its required id reads as closed rather than as a
    /// broken half-open overlay.
    pub fn is_open(&self) -> bool {
        match self.mode {
            Some(ModalMode::Create) => true,
            Some(_) => self.entity_id.is_some(),
            None => false,
        }
    }
}

/// Translator between one screen's URLs and its modal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalResolver {
    id_param: String,
    modal_param: String,
}

impl ModalResolver {
    /// Resolver for a screen whose entity id lives in `id_param`
    pub fn new(id_param: impl Into<String>) -> Self {
        Self {
            id_param: id_param.into(),
            modal_param: MODAL_PARAM.to_string(),
        }
    }

    /// Resolver with a non-default modal parameter name
    pub fn with_modal_param(id_param: impl Into<String>, modal_param: impl Into<String>) -> Self {
        Self {
            id_param: id_param.into(),
            modal_param: modal_param.into(),
        }
    }

    /// Resolver using the configured modal parameter name
    pub fn from_settings(id_param: impl Into<String>, settings: &ModalSettings) -> Self {
        Self::with_modal_param(id_param, settings.modal_param.clone())
    }

    /// Entity id parameter this resolver owns
    pub fn id_param(&self) -> &str {
        &self.id_param
    }

    /// Modal parameter this resolver owns
    pub fn modal_param(&self) -> &str {
        &self.modal_param
    }

    /// Read the modal state out of a URL.
    ///
    /// The first occurrence of each parameter wins, matching browser
    /// `URLSearchParams` reads.
    pub fn state(&self, url: &Url) -> ModalState {
        ModalState {
            mode: self
                .query_value(url, &self.modal_param)
                .and_then(|value| ModalMode::from_param(&value)),
            entity_id: self.query_value(url, &self.id_param),
        }
    }

    /// URL with the modal opened.
    ///
    /// Existing occurrences of the resolver's parameters are replaced in
    /// place (duplicates collapse); missing ones are appended. With no
    /// `entity_id` the id parameter is removed, which is the create case.
    pub fn open(&self, url: &Url, mode: ModalMode, entity_id: Option<&str>) -> Url {
        let mut segments = Vec::new();
        let mut wrote_mode = false;
        let mut wrote_id = false;

        for segment in raw_segments(url) {
            let name = segment_name(segment);
            if name == self.modal_param {
                if !wrote_mode {
                    segments.push(encode_pair(&self.modal_param, mode.as_param()));
                    wrote_mode = true;
                }
            } else if name == self.id_param {
                if let Some(id) = entity_id {
                    if !wrote_id {
                        segments.push(encode_pair(&self.id_param, id));
                        wrote_id = true;
                    }
                }
            } else {
                segments.push(segment.to_string());
            }
        }
        if !wrote_mode {
            segments.push(encode_pair(&self.modal_param, mode.as_param()));
        }
        if let Some(id) = entity_id {
            if !wrote_id {
                segments.push(encode_pair(&self.id_param, id));
            }
        }

        debug!(%mode, entity = ?entity_id, "opening modal");
        self.with_query(url, segments)
    }

    /// URL with the modal closed: both owned parameters removed, every
    /// occurrence included
    pub fn close(&self, url: &Url) -> Url {
        let segments: Vec<String> = raw_segments(url)
            .filter(|segment| {
                let name = segment_name(segment);
                name != self.modal_param && name != self.id_param
            })
            .map(str::to_string)
            .collect();
        debug!(modal = %self.modal_param, "closing modal");
        self.with_query(url, segments)
    }

    fn query_value(&self, url: &Url, name: &str) -> Option<String> {
        raw_segments(url).find_map(|segment| {
            let (segment_name, value) = decode_segment(segment);
            (segment_name == name).then_some(value)
        })
    }

    fn with_query(&self, url: &Url, segments: Vec<String>) -> Url {
        let mut updated = url.clone();
        if segments.is_empty() {
            updated.set_query(None);
        } else {
            updated.set_query(Some(&segments.join("&")));
        }
        updated
    }
}

fn raw_segments(url: &Url) -> impl Iterator<Item = &str> {
    url.query()
        .unwrap_or_default()
        .split('&')
        .filter(|segment| !segment.is_empty())
}

/// Decoded name of one raw query segment
fn segment_name(segment: &str) -> String {
    decode_segment(segment).0
}

/// Decode one raw `name=value` segment; a bare name reads as an empty value
fn decode_segment(segment: &str) -> (String, String) {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .unwrap_or_default()
}

fn encode_pair(name: &str, value: &str) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(name, value)
        .finish()
}
