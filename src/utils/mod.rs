mod plurals;

pub use plurals::count_label;
