pub mod assertion;
pub mod exchange;
pub mod factory;
pub mod id_token;
pub mod jwks_gen;
pub mod keys;
pub mod relying_party;

pub use factory::build_relying_party;
pub use relying_party::RelyingParty;
