//! Timeline views over the event log
//!
//! Summarized: per-minute counts, grouped by the store.
//! Complete: one point per event, optionally paged.

use super::db::{EventStore, StoreError};
use super::types::{non_blank, EventFilter, Page, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineView {
    #[default]
    Summarized,
    Complete,
}

impl TimelineView {
    /// Parse the `view` query parameter; absent or blank means summarized
    pub fn parse(view: Option<&str>) -> Result<Self, ValidationError> {
        match non_blank(view) {
            None | Some("summarized") => Ok(TimelineView::Summarized),
            Some("complete") => Ok(TimelineView::Complete),
            Some(other) => Err(ValidationError::InvalidView(other.to_string())),
        }
    }
}

/// One timeline row, shaped by the view that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimelinePoint {
    Summarized { minute: String, count: u64 },
    Raw { timestamp: DateTime<Utc>, count: u64 },
}

impl TimelinePoint {
    pub fn count(&self) -> u64 {
        match self {
            TimelinePoint::Summarized { count, .. } | TimelinePoint::Raw { count, .. } => *count,
        }
    }
}

/// Build the requested view for one address
///
/// `page` applies to the complete view only; the summarized view is already
/// bounded by the number of distinct minutes.
pub async fn timeline(
    store: &dyn EventStore,
    filter: &EventFilter,
    view: TimelineView,
    page: Option<Page>,
) -> Result<Vec<TimelinePoint>, StoreError> {
    let points: Vec<TimelinePoint> = match view {
        TimelineView::Summarized => store
            .summarized_timeline(filter)
            .await?
            .into_iter()
            .map(|bucket| TimelinePoint::Summarized {
                minute: bucket.minute,
                count: bucket.count,
            })
            .collect(),
        TimelineView::Complete => store
            .complete_timeline(filter, page)
            .await?
            .into_iter()
            .map(|timestamp| TimelinePoint::Raw { timestamp, count: 1 })
            .collect(),
    };

    log::debug!(
        "Timeline for {} ({:?}, protocol {:?}): {} points",
        filter.ip,
        view,
        filter.protocol,
        points.len()
    );

    Ok(points)
}
