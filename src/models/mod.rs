mod click;
mod tour;

pub use click::{ClickAggregate, ClickEvent, ClickGroupBy, ClickQuery};
pub use tour::{normalize_slug, NewTour, Tour, MAX_SLUG_LEN};
