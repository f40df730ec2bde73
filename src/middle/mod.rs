pub mod analyze;
pub mod bignum;
pub mod coerce;
pub mod fold;
pub mod ir;
pub mod scope;
pub mod ty;
pub mod value;
