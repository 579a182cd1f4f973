mod enrollment;
mod sections;
mod utils;

pub use utils::test_utils;
