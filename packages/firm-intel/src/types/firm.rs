//! Firm identity and provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a firm record was first identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmSource {
    AdvOwners,
    Override,
    Edgar,
    AdvFirms,
    Manual,
}

impl FirmSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirmSource::AdvOwners => "adv_owners",
            FirmSource::Override => "override",
            FirmSource::Edgar => "edgar",
            FirmSource::AdvFirms => "adv_firms",
            FirmSource::Manual => "manual",
        }
    }
}

/// A private-equity firm under research.
///
/// Upserts are keyed on `name`; fields never regress to null on update
/// (an incoming `None` keeps the stored value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firm {
    /// Stable identifier
    pub firm_id: i64,

    /// Legal or common name (unique)
    pub name: String,

    /// Primary website, if known
    pub website_url: Option<String>,

    /// Identification source
    pub source: FirmSource,

    /// Social profiles, when discovered
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub twitter_url: Option<String>,
    #[serde(default)]
    pub facebook_url: Option<String>,
    #[serde(default)]
    pub instagram_url: Option<String>,
    #[serde(default)]
    pub youtube_url: Option<String>,
    #[serde(default)]
    pub crunchbase_url: Option<String>,

    /// Last upsert time
    pub updated_at: DateTime<Utc>,
}

impl Firm {
    /// Create a firm with the given identity.
    pub fn new(firm_id: i64, name: impl Into<String>, source: FirmSource) -> Self {
        Self {
            firm_id,
            name: name.into(),
            website_url: None,
            source,
            linkedin_url: None,
            twitter_url: None,
            facebook_url: None,
            instagram_url: None,
            youtube_url: None,
            crunchbase_url: None,
            updated_at: Utc::now(),
        }
    }

    /// Set the website URL.
    pub fn with_website(mut self, url: impl Into<String>) -> Self {
        self.website_url = Some(url.into());
        self
    }

    /// Merge an incoming record into this one without regressing fields.
    pub fn merge_update(&mut self, incoming: &Firm) {
        fn keep(existing: &mut Option<String>, incoming: &Option<String>) {
            if incoming.is_some() {
                *existing = incoming.clone();
            }
        }
        keep(&mut self.website_url, &incoming.website_url);
        keep(&mut self.linkedin_url, &incoming.linkedin_url);
        keep(&mut self.twitter_url, &incoming.twitter_url);
        keep(&mut self.facebook_url, &incoming.facebook_url);
        keep(&mut self.instagram_url, &incoming.instagram_url);
        keep(&mut self.youtube_url, &incoming.youtube_url);
        keep(&mut self.crunchbase_url, &incoming.crunchbase_url);
        self.source = incoming.source;
        self.updated_at = Utc::now();
    }
}
