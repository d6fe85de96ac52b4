use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::system::SupportSystem;

#[derive(Clone)]
pub struct AppState {
    pub system: Arc<SupportSystem>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Progreso de la reconstrucción de índices lanzada desde la API.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl AppState {
    pub fn new(system: Arc<SupportSystem>, shutdown_sender: oneshot::Sender<()>) -> Self {
        Self {
            system,
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
                progress: 0.0,
            })),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        }
    }

    pub fn status(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_status(&self, update: impl FnOnce(&mut Status)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut status);
    }

    /// Marca el estado como ocupado si estaba libre. Devuelve `false` si ya lo estaba.
    pub fn try_begin(&self, message: &str) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_busy {
            return false;
        }
        status.is_busy = true;
        status.message = message.to_string();
        status.progress = 0.0;
        true
    }

    pub fn take_shutdown_sender(&self) -> Option<oneshot::Sender<()>> {
        self.shutdown_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
