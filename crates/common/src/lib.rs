// chatfeed-common: shared wire types and the styled text engine

pub mod protocol;
pub mod style;
