//! News board: a small domain model and the handlers of its route tree.

mod handlers;
mod model;

pub use handlers::register_handlers;
pub use model::{NewsItem, NewsModel, NewsStore};
