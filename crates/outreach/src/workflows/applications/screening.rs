use std::fmt;

use super::domain::{Classification, Company, Posting, RoleLabel};

/// Title words marking a role above the target level. Matched as whole words.
const SENIOR_TITLE_MARKERS: &[&str] = &[
    "senior",
    "sr",
    "principal",
    "staff",
    "lead",
    "manager",
    "director",
    "architect",
    "head of",
    "vp",
    "vice president",
];

/// Experience requirements in the posting body that rule a role out.
const SENIOR_BODY_MARKERS: &[&str] = &["10+ years", "15+ years", "phd required"];

/// Why a discovered posting was dropped before or after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenRejection {
    AlreadyTracked,
    TooSenior { marker: &'static str },
    OutsidePreferredLocations { location: String },
    OffAffinity { role: RoleLabel },
}

impl fmt::Display for ScreenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenRejection::AlreadyTracked => f.write_str("posting already tracked"),
            ScreenRejection::TooSenior { marker } => write!(f, "too senior ({marker})"),
            ScreenRejection::OutsidePreferredLocations { location } => {
                write!(f, "location {location} not preferred")
            }
            ScreenRejection::OffAffinity { role } => {
                write!(f, "{role} outside the company's target roles")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreeningPolicy {
    pub skip_senior_roles: bool,
}

impl Default for ScreeningPolicy {
    fn default() -> Self {
        Self {
            skip_senior_roles: true,
        }
    }
}

impl ScreeningPolicy {
    /// Checks that need no classification. `already_tracked` comes from the ledger.
    pub fn before_classification(
        &self,
        company: &Company,
        posting: &Posting,
        already_tracked: bool,
    ) -> Result<(), ScreenRejection> {
        if already_tracked {
            return Err(ScreenRejection::AlreadyTracked);
        }

        if self.skip_senior_roles {
            if let Some(marker) = seniority_marker(posting) {
                return Err(ScreenRejection::TooSenior { marker });
            }
        }

        if let Some(location) = &posting.location {
            let lowered = location.to_lowercase();
            let preferred = &company.preferred_locations;
            if !preferred.is_empty()
                && !preferred
                    .iter()
                    .any(|wanted| lowered.contains(&wanted.to_lowercase()))
            {
                return Err(ScreenRejection::OutsidePreferredLocations {
                    location: location.clone(),
                });
            }
        }

        Ok(())
    }

    /// Role affinity; an empty affinity list accepts every track.
    pub fn after_classification(
        &self,
        company: &Company,
        classification: &Classification,
    ) -> Result<(), ScreenRejection> {
        if company.role_affinity.is_empty() || company.role_affinity.contains(&classification.role)
        {
            Ok(())
        } else {
            Err(ScreenRejection::OffAffinity {
                role: classification.role,
            })
        }
    }
}

fn seniority_marker(posting: &Posting) -> Option<&'static str> {
    let title = padded_words(&posting.title);
    if let Some(marker) = SENIOR_TITLE_MARKERS
        .iter()
        .copied()
        .find(|marker| title.contains(&format!(" {marker} ")))
    {
        return Some(marker);
    }

    let body = posting.description.to_lowercase();
    SENIOR_BODY_MARKERS
        .iter()
        .copied()
        .find(|marker| body.contains(marker))
}

fn padded_words(raw: &str) -> String {
    let words: Vec<String> = raw
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}
