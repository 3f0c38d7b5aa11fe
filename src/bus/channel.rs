use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use livebus_error::BusError;

use super::{
    main_loop::MainContext,
    observer::{AttachMode, Observer, ObserverId, ObserverSlot},
    scope::{Scope, ScopeState},
};
use crate::config::DeferredPolicy;

/// Текущее значение темы и его версия (0, если значения ещё не было).
struct ValueCell<T> {
    value: Option<Arc<T>>,
    version: u64,
}

/// Единица работы доставки.
enum Dispatch<T> {
    /// Публикация: значение, его версия и наблюдатели на момент публикации.
    Publish {
        version: u64,
        value: Arc<T>,
        observers: Vec<Arc<ObserverSlot<T>>>,
    },
    /// Повтор текущего значения одному sticky-наблюдателю.
    Replay(Arc<ObserverSlot<T>>),
}

/// Очередь доставки канала.
///
/// Обратные вызовы канала выполняет только один поток за раз (`draining`),
/// причём без удержания блокировок канала. Работа, поставленная во время
/// доставки, выполняется этим же потоком по порядку.
struct DispatchQueue<T> {
    items: VecDeque<Dispatch<T>>,
    draining: bool,
}

struct ChannelInner<T> {
    name: Arc<str>,
    dispatch: Mutex<DispatchQueue<T>>,
    cell: RwLock<ValueCell<T>>,
    /// Порядок регистрации сохраняется.
    observers: RwLock<Vec<Arc<ObserverSlot<T>>>>,
    /// Ожидающее значение для `DeferredPolicy::Coalesce`.
    pending: Mutex<Option<Arc<T>>>,
    main: Option<Arc<dyn MainContext>>,
    policy: DeferredPolicy,
    publish_count: AtomicU64,
    delivery_count: AtomicU64,
    deferred_count: AtomicU64,
}

/// Канал одной темы.
///
/// Хранит последнее опубликованное значение и набор наблюдателей.
/// Клонирование создаёт новый дескриптор того же канала.
///
/// Поддерживает:
/// - немедленную публикацию на потоке вызывающего ([`publish`](Self::publish));
/// - отложенную публикацию через главный контекст
///   ([`publish_deferred`](Self::publish_deferred));
/// - подключение fresh (без повтора) и sticky (сразу текущее значение);
/// - автоматическое отключение наблюдателей по завершении их [`Scope`].
pub struct TopicChannel<T> {
    inner: Arc<ChannelInner<T>>,
}

/// Снимок статистики канала.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub topic: String,
    pub version: u64,
    pub publishes: u64,
    pub deliveries: u64,
    pub deferred: u64,
    pub observers: usize,
    pub active_observers: usize,
}

impl<T> Clone for TopicChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for TopicChannel<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TopicChannel")
            .field("topic", &self.inner.name)
            .field("version", &self.inner.cell.read().version)
            .field("observers", &self.inner.observers.read().len())
            .finish()
    }
}

impl<T> TopicChannel<T>
where
    T: Send + Sync + 'static,
{
    /// Отдельный канал без главного контекста.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::build(name.into(), None, DeferredPolicy::default())
    }

    /// Отдельный канал с главным контекстом для отложенной доставки.
    pub fn with_main_context(
        name: impl Into<Arc<str>>,
        main: Arc<dyn MainContext>,
        policy: DeferredPolicy,
    ) -> Self {
        Self::build(name.into(), Some(main), policy)
    }

    pub(crate) fn build(
        name: Arc<str>,
        main: Option<Arc<dyn MainContext>>,
        policy: DeferredPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name,
                dispatch: Mutex::new(DispatchQueue {
                    items: VecDeque::new(),
                    draining: false,
                }),
                cell: RwLock::new(ValueCell {
                    value: None,
                    version: 0,
                }),
                observers: RwLock::new(Vec::new()),
                pending: Mutex::new(None),
                main,
                policy,
                publish_count: AtomicU64::new(0),
                delivery_count: AtomicU64::new(0),
                deferred_count: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Проверяет, указывают ли два дескриптора на один канал.
    pub fn ptr_eq(
        a: &Self,
        b: &Self,
    ) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Немедленная публикация.
    ///
    /// Сохраняет значение как текущее и доставляет его всем подключённым
    /// активным наблюдателям. Возвращает число наблюдателей, получивших
    /// значение от этого вызова.
    ///
    /// Обычно доставка идёт синхронно на потоке публикующего. Если канал в
    /// этот момент уже доставляет значения (на другом потоке или это
    /// публикация изнутри обратного вызова), значение ставится в очередь
    /// канала и доставляется тем потоком сразу после текущего, а вызов
    /// возвращает 0. Порядок публикаций для каждого наблюдателя
    /// сохраняется; блокировки канала во время обратных вызовов не
    /// удерживаются, поэтому перекрёстные публикации между темами из
    /// разных потоков не блокируют друг друга.
    pub fn publish(
        &self,
        value: T,
    ) -> usize {
        self.inner.publish(Arc::new(value))
    }

    /// Отложенная публикация через главный контекст.
    ///
    /// Не блокирует и не ждёт доставки. Значение становится текущим в
    /// момент выполнения задачи в главном контексте.
    ///
    /// # Ошибки
    /// - [`BusError::NoMainContext`], если контекст не назначен;
    /// - [`BusError::MainContextClosed`], если контекст остановлен.
    pub fn publish_deferred(
        &self,
        value: T,
    ) -> Result<(), BusError> {
        let main = self
            .inner
            .main
            .as_ref()
            .ok_or_else(|| BusError::NoMainContext {
                topic: self.inner.name.to_string(),
            })?;
        if main.is_closed() {
            // Значение от поста, который цикл уже не выполнит, не должно
            // поглощать новые.
            self.inner.pending.lock().take();
            return Err(BusError::MainContextClosed);
        }
        let value = Arc::new(value);

        match self.inner.policy {
            DeferredPolicy::Queue => {
                let inner = Arc::clone(&self.inner);
                main.post(Box::new(move || {
                    inner.publish(value);
                }))?;
            }
            DeferredPolicy::Coalesce => {
                let post_task = {
                    let mut pending = self.inner.pending.lock();
                    let was_empty = pending.is_none();
                    *pending = Some(value);
                    was_empty
                };
                if !post_task {
                    trace!(topic = %self.inner.name, "Deferred value coalesced");
                    self.inner.deferred_count.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                let inner = Arc::clone(&self.inner);
                let posted = main.post(Box::new(move || {
                    let latest = inner.pending.lock().take();
                    if let Some(latest) = latest {
                        inner.publish(latest);
                    }
                }));
                if let Err(err) = posted {
                    self.inner.pending.lock().take();
                    return Err(err);
                }
            }
        }

        self.inner.deferred_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Подключает наблюдателя в заданном режиме.
    ///
    /// - Наблюдатель получает все будущие публикации, пока жива `scope`.
    /// - `AttachMode::Sticky`: если значение уже есть и область активна,
    ///   оно доставляется ровно один раз: синхронно до возврата, либо, если
    ///   канал в этот момент доставляет на другом потоке, тем потоком.
    /// - Завершённая область: подключение игнорируется, доставок не будет.
    /// - Повторное подключение того же наблюдателя из той же области
    ///   идемпотентно; из другой области вернёт [`BusError::ObserverScopeConflict`].
    pub fn attach(
        &self,
        scope: &Scope,
        observer: Observer<T>,
        mode: AttachMode,
    ) -> Result<ObserverId, BusError> {
        let id = observer.id();
        if scope.is_ended() {
            debug!(topic = %self.inner.name, observer = %id, scope = %scope.id(), "Scope already ended, attach ignored");
            return Ok(id);
        }

        let slot = {
            let cell = self.inner.cell.read();
            let mut observers = self.inner.observers.write();
            if let Some(existing) = observers.iter().find(|slot| slot.id() == id) {
                if existing.scope_id() == scope.id() {
                    return Ok(id);
                }
                return Err(BusError::ObserverScopeConflict {
                    topic: self.inner.name.to_string(),
                    observer: id.as_u64(),
                });
            }
            let slot = Arc::new(ObserverSlot::new(observer, scope, mode, cell.version));
            observers.push(Arc::clone(&slot));
            slot
        };

        let weak = Arc::downgrade(&self.inner);
        let listener = scope.on_state_change(move |state| {
            if let Some(inner) = weak.upgrade() {
                inner.on_scope_state(id, state);
            }
        });
        match listener {
            Some(listener) => slot.set_listener(listener),
            None => {
                // Область завершилась между проверкой и регистрацией.
                self.inner.detach(id);
                return Ok(id);
            }
        }

        // Смена состояния до регистрации слушателя прошла мимо слота.
        if slot.sync_active() && slot.is_sticky() {
            self.inner.replay(slot);
        }

        debug!(
            topic = %self.inner.name,
            observer = %id,
            scope = %scope.id(),
            mode = ?mode,
            "Observer attached"
        );
        Ok(id)
    }

    /// Подключает наблюдателя в режиме sticky.
    pub fn attach_sticky(
        &self,
        scope: &Scope,
        observer: Observer<T>,
    ) -> Result<ObserverId, BusError> {
        self.attach(scope, observer, AttachMode::Sticky)
    }

    /// Подключает обратный вызов в режиме fresh.
    pub fn observe<F>(
        &self,
        scope: &Scope,
        on_value: F,
    ) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.attach_new(scope, Observer::new(on_value), AttachMode::Fresh)
    }

    /// Подключает обратный вызов в режиме sticky.
    pub fn observe_sticky<F>(
        &self,
        scope: &Scope,
        on_value: F,
    ) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.attach_new(scope, Observer::new(on_value), AttachMode::Sticky)
    }

    fn attach_new(
        &self,
        scope: &Scope,
        observer: Observer<T>,
        mode: AttachMode,
    ) -> ObserverId {
        let id = observer.id();
        // Новый наблюдатель не может конфликтовать с уже подключёнными.
        match self.attach(scope, observer, mode) {
            Ok(id) => id,
            Err(err) => {
                debug!(topic = %self.inner.name, error = %err, "Unexpected attach failure");
                id
            }
        }
    }

    /// Явно отключает наблюдателя. Возвращает `false`, если он не подключён.
    ///
    /// Если наблюдатель в этот момент получает значение на другом потоке,
    /// вызов дожидается окончания доставки.
    pub fn remove_observer(
        &self,
        id: ObserverId,
    ) -> bool {
        self.inner.detach(id)
    }

    /// Отключает всех наблюдателей, подключённых из `scope`.
    pub fn remove_observers(
        &self,
        scope: &Scope,
    ) -> usize {
        let ids: Vec<ObserverId> = self
            .inner
            .observers
            .read()
            .iter()
            .filter(|slot| slot.scope_id() == scope.id())
            .map(|slot| slot.id())
            .collect();
        ids.into_iter().filter(|id| self.inner.detach(*id)).count()
    }

    /// Текущее значение как `Arc` (без клонирования `T`).
    pub fn value_arc(&self) -> Option<Arc<T>> {
        self.inner.cell.read().value.clone()
    }

    /// Доступ к текущему значению по ссылке.
    pub fn with_value<R>(
        &self,
        f: impl FnOnce(Option<&T>) -> R,
    ) -> R {
        let value = self.value_arc();
        f(value.as_deref())
    }

    pub fn has_value(&self) -> bool {
        self.inner.cell.read().value.is_some()
    }

    /// Число доставленных публикаций (0, пока значения не было).
    pub fn version(&self) -> u64 {
        self.inner.cell.read().version
    }

    pub fn has_observers(&self) -> bool {
        !self.inner.observers.read().is_empty()
    }

    pub fn has_active_observers(&self) -> bool {
        self.inner.observers.read().iter().any(|slot| slot.is_active())
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    pub fn stats(&self) -> ChannelStats {
        let observers = self.inner.observers.read();
        ChannelStats {
            topic: self.inner.name.to_string(),
            version: self.version(),
            publishes: self.inner.publish_count.load(Ordering::Relaxed),
            deliveries: self.inner.delivery_count.load(Ordering::Relaxed),
            deferred: self.inner.deferred_count.load(Ordering::Relaxed),
            observers: observers.len(),
            active_observers: observers.iter().filter(|slot| slot.is_active()).count(),
        }
    }
}

impl<T> TopicChannel<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Клон текущего значения.
    pub fn value(&self) -> Option<T> {
        self.inner.cell.read().value.as_deref().cloned()
    }
}

impl<T> ChannelInner<T>
where
    T: Send + Sync + 'static,
{
    fn publish(
        &self,
        value: Arc<T>,
    ) -> usize {
        let version = {
            let mut cell = self.cell.write();
            cell.version += 1;
            cell.value = Some(Arc::clone(&value));
            // Постановка под блокировкой значения: порядок очереди совпадает
            // с порядком версий.
            let observers = self.observers.read().clone();
            self.dispatch.lock().items.push_back(Dispatch::Publish {
                version: cell.version,
                value,
                observers,
            });
            cell.version
        };
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        self.drain(Some(version))
    }

    /// Ставит повтор текущего значения для sticky-наблюдателя.
    fn replay(
        &self,
        slot: Arc<ObserverSlot<T>>,
    ) {
        self.dispatch.lock().items.push_back(Dispatch::Replay(slot));
        self.drain(None);
    }

    /// Выполняет очередь доставки, если её не выполняет другой поток.
    ///
    /// Возвращает число наблюдателей, получивших публикацию версии `own`.
    fn drain(
        &self,
        own: Option<u64>,
    ) -> usize {
        {
            let mut queue = self.dispatch.lock();
            if queue.draining {
                return 0;
            }
            queue.draining = true;
        }
        let _reset = DrainGuard(&self.dispatch);

        let mut own_reached = 0;
        loop {
            let item = {
                let mut queue = self.dispatch.lock();
                match queue.items.pop_front() {
                    Some(item) => item,
                    None => {
                        queue.draining = false;
                        break;
                    }
                }
            };

            match item {
                Dispatch::Publish {
                    version,
                    value,
                    observers,
                } => {
                    let reached = observers
                        .iter()
                        .filter(|slot| slot.deliver(&value, version))
                        .count();
                    self.delivery_count
                        .fetch_add(reached as u64, Ordering::Relaxed);
                    trace!(topic = %self.name, version, reached, "Value published");
                    if own == Some(version) {
                        own_reached = reached;
                    }
                }
                Dispatch::Replay(slot) => {
                    let (value, version) = {
                        let cell = self.cell.read();
                        (cell.value.clone(), cell.version)
                    };
                    if let Some(value) = value {
                        if slot.deliver(&value, version) {
                            self.delivery_count.fetch_add(1, Ordering::Relaxed);
                            trace!(topic = %self.name, observer = %slot.id(), version, "Sticky value replayed");
                        }
                    }
                }
            }
        }
        own_reached
    }

    fn find(
        &self,
        id: ObserverId,
    ) -> Option<Arc<ObserverSlot<T>>> {
        self.observers
            .read()
            .iter()
            .find(|slot| slot.id() == id)
            .cloned()
    }

    fn on_scope_state(
        &self,
        id: ObserverId,
        state: ScopeState,
    ) {
        match state {
            ScopeState::Ended => {
                if self.detach(id) {
                    debug!(topic = %self.name, observer = %id, "Observer detached by scope end");
                }
            }
            ScopeState::Inactive | ScopeState::Active => {
                if let Some(slot) = self.find(id) {
                    if slot.sync_active() && slot.is_sticky() {
                        self.replay(slot);
                    }
                }
            }
        }
    }

    fn detach(
        &self,
        id: ObserverId,
    ) -> bool {
        let slot = {
            let mut observers = self.observers.write();
            match observers.iter().position(|slot| slot.id() == id) {
                Some(pos) => observers.remove(pos),
                None => return false,
            }
        };
        slot.detach();
        true
    }
}

/// Снимает флаг `draining`, если обратный вызов паникует посреди очереди:
/// следующая публикация продолжит доставку оставшегося.
struct DrainGuard<'a, T>(&'a Mutex<DispatchQueue<T>>);

impl<T> Drop for DrainGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}
