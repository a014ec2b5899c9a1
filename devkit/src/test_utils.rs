/*!
Helpers de tests pour le kernel

- Attente active d'une condition avec timeout (tâches périodiques, polls)
- Accès et assertions sur des champs JSON imbriqués ("a.b.0.c")
*/

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

/// Réévalue `condition` toutes les 20ms jusqu'à ce qu'elle soit vraie
pub async fn wait_until<F>(timeout_ms: u64, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let _ = env_logger::try_init();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if condition() {
        return Ok(());
    }

    log::warn!("⏰ Condition not met after {timeout_ms}ms");
    anyhow::bail!("condition not met within {timeout_ms}ms")
}

/// Champ imbriqué par chemin pointé ; les segments numériques indexent les tableaux
pub fn json_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn assert_field_equals(value: &Value, path: &str, expected: &Value) -> Result<()> {
    match json_field(value, path) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => anyhow::bail!("Field '{path}' mismatch: expected {expected:?}, got {actual:?}"),
        None => anyhow::bail!("Field '{path}' not found"),
    }
}
