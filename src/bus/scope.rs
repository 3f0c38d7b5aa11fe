use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use tracing::trace;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Идентификатор области жизни.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Идентификатор слушателя состояния области.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Состояние области жизни.
///
/// `Ended` терминальное: из него нет переходов.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Наблюдатели зарегистрированы, но ничего не получают.
    Inactive,
    /// Наблюдатели получают значения.
    Active,
    /// Область завершена, наблюдатели отключены.
    Ended,
}

/// Слушатель смены состояния области.
pub type ScopeListener = Arc<dyn Fn(ScopeState) + Send + Sync>;

struct ScopeCore {
    state: ScopeState,
    listeners: Vec<(ListenerId, ScopeListener)>,
    next_listener: u64,
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    label: Option<Arc<str>>,
    core: Mutex<ScopeCore>,
}

/// Область жизни, ограничивающая окно подключения наблюдателей.
///
/// Владелец области (экран, задача, соединение) переводит её между
/// `Active` и `Inactive` и завершает через [`Scope::end`]. При `Drop`
/// область завершается автоматически, поэтому наблюдатели не переживают
/// своего владельца.
///
/// Смены состояния предполагается выполнять из одного контекста-владельца;
/// слушатели вызываются вне внутренней блокировки.
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Создаёт активную область.
    pub fn new() -> Self {
        Self::with_state(None, ScopeState::Active)
    }

    /// Создаёт область в состоянии `Inactive`.
    pub fn inactive() -> Self {
        Self::with_state(None, ScopeState::Inactive)
    }

    /// Создаёт активную область с меткой (для логов).
    pub fn named(label: impl Into<Arc<str>>) -> Self {
        Self::with_state(Some(label.into()), ScopeState::Active)
    }

    fn with_state(
        label: Option<Arc<str>>,
        state: ScopeState,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed)),
                label,
                core: Mutex::new(ScopeCore {
                    state,
                    listeners: Vec::new(),
                    next_listener: 1,
                }),
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    pub fn state(&self) -> ScopeState {
        self.inner.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ScopeState::Active
    }

    pub fn is_ended(&self) -> bool {
        self.state() == ScopeState::Ended
    }

    /// Переводит область в `Inactive`. Для завершённой области ничего не делает.
    pub fn pause(&self) {
        self.inner.transition(ScopeState::Inactive);
    }

    /// Переводит область в `Active`. Для завершённой области ничего не делает.
    pub fn resume(&self) {
        self.inner.transition(ScopeState::Active);
    }

    /// Завершает область: слушатели получают `Ended` и удаляются.
    ///
    /// Повторный вызов ничего не делает.
    pub fn end(&self) {
        self.inner.transition(ScopeState::Ended);
    }

    /// Регистрирует слушателя смены состояния.
    ///
    /// Возвращает `None`, если область уже завершена.
    pub fn on_state_change<F>(
        &self,
        listener: F,
    ) -> Option<ListenerId>
    where
        F: Fn(ScopeState) + Send + Sync + 'static,
    {
        self.inner.add_listener(Arc::new(listener))
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.inner.remove_listener(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.core.lock().listeners.len()
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Arc::downgrade(&self.inner)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for Scope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

impl ScopeInner {
    pub(crate) fn state(&self) -> ScopeState {
        self.core.lock().state
    }

    fn add_listener(
        &self,
        listener: ScopeListener,
    ) -> Option<ListenerId> {
        let mut core = self.core.lock();
        if core.state == ScopeState::Ended {
            return None;
        }
        let id = ListenerId(core.next_listener);
        core.next_listener += 1;
        core.listeners.push((id, listener));
        Some(id)
    }

    pub(crate) fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        let mut core = self.core.lock();
        let before = core.listeners.len();
        core.listeners.retain(|(lid, _)| *lid != id);
        core.listeners.len() != before
    }

    fn transition(
        &self,
        next: ScopeState,
    ) {
        let listeners = {
            let mut core = self.core.lock();
            if core.state == ScopeState::Ended || core.state == next {
                return;
            }
            core.state = next;
            if next == ScopeState::Ended {
                std::mem::take(&mut core.listeners)
            } else {
                core.listeners.clone()
            }
        };

        trace!(
            scope = %self.id,
            label = self.label.as_deref().unwrap_or(""),
            state = ?next,
            listeners = listeners.len(),
            "Scope state changed"
        );

        for (_, listener) in listeners {
            listener(next);
        }
    }
}
