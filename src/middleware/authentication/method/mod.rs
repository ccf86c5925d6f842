mod f_signature;

pub use f_signature::try_signature;
