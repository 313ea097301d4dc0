//! The activity matrix: status elements grouped by episode, focus election
//! and the periodic sweep.

mod activity_matrix;
mod episode;
mod status_element;
mod sweep;

pub use activity_matrix::ActivityMatrix;
pub use episode::EpisodeStatusSet;
pub use status_element::ParcelStatusElement;
pub use sweep::{SweepError, SweepReport};
