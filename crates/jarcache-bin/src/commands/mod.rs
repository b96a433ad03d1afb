pub mod inspect;
pub mod lookup;
pub mod sync;
