pub mod graph;
pub mod sorted_list;

pub use graph::{job_graph, Graph};
pub use sorted_list::{CompareFn, Item, ListView, SortedUniqueList};
