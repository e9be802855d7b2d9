//! Fixed test identities.

use serde_json::{json, Value};

/// Username accepted by the default login mock.
pub const TEST_USERNAME: &str = "01012345678";

/// Password accepted by the default login mock.
pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Subject claim of credentials built without `for_subject`.
pub const TEST_SUBJECT: &str = "test-user";

/// Renewal credential used where its contents do not matter.
pub const TEST_RENEWAL_CREDENTIAL: &str = "test-renewal-credential";

/// Message returned by the login mock for a wrong password.
pub const TEST_LOGIN_REJECTION: &str = "Incorrect phone number or password";

/// Profile returned by the profile endpoint mock.
pub fn test_profile() -> Value {
    json!({
        "id": 1,
        "name": "Test User",
        "phone": TEST_USERNAME,
    })
}
