pub mod clock;
pub mod codes;
pub mod password;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codes::{CodeGenerator, RandomCodeGenerator, SeededCodeGenerator};
pub use password::{
    hash_password, verify_against_placeholder, verify_password, Password, PasswordHashString,
};
pub use validation::ValidatedJson;
