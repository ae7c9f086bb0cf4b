//! Built-in chain nodes.
//!
//! | Node             | Stage             | Types       |
//! |------------------|-------------------|-------------|
//! | `CssInspector`   | Inspector         | CSS         |
//! | `Minifier`       | Minification      | JS, CSS     |
//! | `TextAggregator` | Aggregator        | JS, CSS     |
//! | `Compressor`     | BinaryCompression | all         |

mod aggregate;
mod compress;
mod inspect;
mod minify;

pub use aggregate::{AGGREGATE_NAME, TextAggregator};
pub use compress::{Compressor, GzipFilter};
pub use inspect::CssInspector;
pub use minify::{MinifyFilter, Minifier, minify_css, minify_js};
