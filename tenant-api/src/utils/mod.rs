pub mod api_key;
pub mod password;
pub mod validation;

pub use api_key::generate_api_key;
pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use validation::FormOrJson;
