//! Asynchronous sequences.
//!
//! [`AStream`] is pulled one element at a time, [`ASink`] is pushed with
//! back-pressure. [`RandezvousQueue`] connects a sink to a stream, and
//! [`AStreamExt`] adds the composition operators:
//!
//! | Operator | Result |
//! |----------|--------|
//! | `map` | [`Map`] |
//! | `flat_map` | [`FlatMap`] |
//! | `window` | [`Window`], prefetching up to `size` elements |
//! | `all` | [`All`], element failures as values |
//! | `consume` / `collect` | a promise for the drained stream |

mod all;
mod collect;
mod iter;
mod map;
mod randezvous;
#[allow(clippy::module_inception)]
mod stream;
mod window;

pub use all::All;
pub use collect::{collect, consume};
pub use iter::{IterStream, iter_stream};
pub use map::{FlatMap, Map};
pub use randezvous::{RandezvousQueue, RandezvousSink, RandezvousStream};
pub use stream::{ASink, AStream, AStreamExt, BoxSink, BoxStream};
pub use window::Window;
