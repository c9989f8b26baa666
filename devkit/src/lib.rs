/*!
# Zabbix-Mon DevKit - Stubs et Utilitaires pour Tests

Bibliothèque facilitant le test de l'agent sans serveur Zabbix réel:
- Faux trapper (protocole sender, réponses scriptées)
- Fausse API JSON-RPC (login, hôtes, items, erreurs scriptées)
- Harness démarrant les deux sur des ports éphémères
*/

pub mod api_stub;
pub mod test_utils;
pub mod trapper_stub;

pub use api_stub::{MockZabbixApi, RecordedCall};
pub use test_utils::TestHarness;
pub use trapper_stub::{MockTrapper, TrapperReply};

use std::sync::{Mutex, MutexGuard};

/// Verrou tolérant l'empoisonnement (un test qui panique ne bloque pas les autres)
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
