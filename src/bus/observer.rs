use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::{Mutex, ReentrantMutex};

use super::scope::{ListenerId, Scope, ScopeId, ScopeInner, ScopeState};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Идентичность наблюдателя. Клоны одного [`Observer`] разделяют её.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Режим подключения наблюдателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode {
    /// Только публикации после подключения.
    #[default]
    Fresh,
    /// Сразу получить текущее значение (если есть), затем живые публикации.
    Sticky,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Обратный вызов наблюдателя с устойчивой идентичностью.
///
/// Один и тот же `Observer` можно подключить к нескольким темам; к одной
/// теме только из одной области жизни.
pub struct Observer<T> {
    id: ObserverId,
    callback: Callback<T>,
}

impl<T> Observer<T> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            id: ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    fn notify(
        &self,
        value: &T,
    ) {
        (self.callback)(value)
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Observer").field("id", &self.id).finish()
    }
}

#[derive(Debug)]
struct SlotState {
    /// Последняя доставленная версия значения канала.
    last_version: u64,
    active: bool,
    detached: bool,
}

/// Подключение наблюдателя к конкретному каналу.
///
/// `state` удерживается только на время проверок. `delivery` удерживается
/// на время обратного вызова: `detach` дожидается окончания текущей
/// доставки, а сам наблюдатель может отключиться изнутри вызова
/// (блокировка реентерабельна).
pub(crate) struct ObserverSlot<T> {
    observer: Observer<T>,
    mode: AttachMode,
    scope_id: ScopeId,
    scope: Weak<ScopeInner>,
    listener: Mutex<Option<ListenerId>>,
    state: Mutex<SlotState>,
    delivery: ReentrantMutex<()>,
}

impl<T> ObserverSlot<T> {
    /// `current_version` — версия канала на момент подключения: fresh
    /// наблюдатель не получит значения этой версии и старше.
    pub(crate) fn new(
        observer: Observer<T>,
        scope: &Scope,
        mode: AttachMode,
        current_version: u64,
    ) -> Self {
        let last_version = match mode {
            AttachMode::Sticky => 0,
            AttachMode::Fresh => current_version,
        };
        Self {
            observer,
            mode,
            scope_id: scope.id(),
            scope: scope.downgrade(),
            listener: Mutex::new(None),
            state: Mutex::new(SlotState {
                last_version,
                active: scope.is_active(),
                detached: false,
            }),
            delivery: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn id(&self) -> ObserverId {
        self.observer.id()
    }

    pub(crate) fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    pub(crate) fn is_sticky(&self) -> bool {
        self.mode == AttachMode::Sticky
    }

    pub(crate) fn is_active(&self) -> bool {
        let state = self.state.lock();
        state.active && !state.detached
    }

    /// Перечитывает состояние области и обновляет флаг активности.
    ///
    /// Состояние читается под блокировкой слота, поэтому последний вызов
    /// всегда видит последнее состояние области, в каком бы порядке ни
    /// пришли уведомления. Возвращает новое значение флага.
    pub(crate) fn sync_active(&self) -> bool {
        let mut state = self.state.lock();
        state.active = self
            .scope
            .upgrade()
            .is_some_and(|scope| scope.state() == ScopeState::Active);
        state.active && !state.detached
    }

    pub(crate) fn set_listener(
        &self,
        id: ListenerId,
    ) {
        *self.listener.lock() = Some(id);
    }

    /// Доставляет значение, если наблюдатель активен и `version` новее
    /// последней доставленной. Возвращает `true`, если вызов состоялся.
    pub(crate) fn deliver(
        &self,
        value: &T,
        version: u64,
    ) -> bool {
        let _delivery = self.delivery.lock();
        {
            let mut state = self.state.lock();
            if state.detached || !state.active || state.last_version >= version {
                return false;
            }
            state.last_version = version;
        }
        self.observer.notify(value);
        true
    }

    /// Окончательно отключает наблюдателя и снимает слушателя с области.
    ///
    /// Возвращается только после завершения доставки, начатой на другом
    /// потоке.
    pub(crate) fn detach(&self) {
        self.state.lock().detached = true;
        drop(self.delivery.lock());
        if let Some(listener) = self.listener.lock().take() {
            if let Some(scope) = self.scope.upgrade() {
                scope.remove_listener(listener);
            }
        }
    }
}
