/**
 * ERREURS KERNEL - Taxonomie unique des échecs du pipeline télémétrie
 *
 * RÔLE :
 * Aucune de ces erreurs n'est fatale au processus. Chaque composant absorbe
 * les siennes : le poller garde le snapshot précédent, le hub déconnecte
 * l'observateur fautif, l'API renvoie un 400 sur une cadence invalide.
 */

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Échec du poll registre (réseau, timeout, statut HTTP, payload)
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),
    /// Valeur de configuration refusée, aucun changement d'état
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Buffer de l'observateur saturé : il est déconnecté
    #[error("Observer {0} unresponsive")]
    ObserverUnresponsive(Uuid),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl IntoResponse for KernelError {
    fn into_response(self) -> Response {
        let code = match &self {
            KernelError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            KernelError::RegistryUnavailable(_) | KernelError::Http(_) => StatusCode::SERVICE_UNAVAILABLE,
            KernelError::ObserverUnresponsive(_) | KernelError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_maps_to_bad_request() {
        let resp = KernelError::InvalidConfiguration("intervalMs must be >= 500".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_registry_unavailable_maps_to_503() {
        let resp = KernelError::RegistryUnavailable("timeout".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
