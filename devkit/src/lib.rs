/*!
# Telewatch DevKit - Stubs et utilitaires pour développer autour du kernel

Bibliothèque facilitant les tests du pipeline télémétrie avec:
- Stub HTTP du Registry Service (snapshot scriptable, pannes simulées)
- Fixtures JSON au format du registre et du simulateur
- Helpers d'attente et d'assertions JSON
*/

pub mod fixtures;
pub mod registry_stub;
pub mod test_utils;

pub use fixtures::{fleet, DeviceFixture, ReadingFixture};
pub use registry_stub::{RegistryStub, StubBehavior};
pub use test_utils::{assert_field_equals, json_field, wait_until};
