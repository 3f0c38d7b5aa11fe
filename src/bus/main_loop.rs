//! Контекст отложенной доставки.
//!
//! Ядро шины знает о «главном» контексте только одно: в него можно
//! поставить задачу, которая выполнится позже и строго по порядку.
//! [`MainLoop`]: готовая реализация на очереди `tokio::sync::mpsc`,
//! которую можно прокручивать вручную ([`MainLoop::run_pending`]) или
//! запустить отдельной tokio-задачей ([`MainLoop::spawn`]).

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::{
    sync::{mpsc, Mutex as AsyncMutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, trace};

use livebus_error::BusError;

/// Задача, выполняемая в главном контексте.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Контекст, в котором выполняется отложенная доставка.
///
/// Реализация обязана выполнять задачи в порядке постановки и не
/// блокировать вызывающего в `post`.
pub trait MainContext: Send + Sync {
    fn post(
        &self,
        task: Task,
    ) -> Result<(), BusError>;

    /// Контекст остановлен: поставленные задачи уже не выполнятся.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Однопоточная FIFO-очередь задач.
pub struct MainLoop {
    tx: mpsc::UnboundedSender<Task>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Task>>,
    pending: AtomicUsize,
    closed: AtomicBool,
    shutdown: Notify,
}

impl MainLoop {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: AsyncMutex::new(rx),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Выполняет все задачи, накопленные в очереди, на текущем потоке.
    ///
    /// Задачи, поставленные во время прокрутки, тоже выполняются. Если цикл
    /// уже запущен через [`MainLoop::run`], возвращает 0.
    pub fn run_pending(&self) -> usize {
        let Ok(mut rx) = self.rx.try_lock() else {
            return 0;
        };
        let mut executed = 0;
        while let Ok(task) = rx.try_recv() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            task();
            executed += 1;
        }
        executed
    }

    /// Выполняет задачи по мере поступления до вызова [`MainLoop::shutdown`].
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.rx.lock().await;
        debug!("Main loop started");
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                task = rx.recv() => match task {
                    Some(task) => {
                        self.pending.fetch_sub(1, Ordering::AcqRel);
                        task();
                    }
                    None => break,
                },
            }
        }
        debug!(dropped = self.pending(), "Main loop stopped");
    }

    /// Запускает [`MainLoop::run`] отдельной tokio-задачей.
    ///
    /// Должен вызываться внутри tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Останавливает цикл; новые задачи отклоняются с
    /// [`BusError::MainContextClosed`].
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }

    /// Количество задач, ожидающих выполнения.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl MainContext for MainLoop {
    fn post(
        &self,
        task: Task,
    ) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::MainContextClosed);
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(BusError::MainContextClosed);
        }
        trace!(pending = self.pending(), "Task posted to main loop");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MainLoop {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MainLoop")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::timeout;

    use super::*;

    /// Тест проверяет, что ручная прокрутка выполняет задачи по порядку
    /// и только в момент вызова.
    #[test]
    fn test_run_pending_in_order() {
        let main = MainLoop::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = seen.clone();
            main.post(Box::new(move || seen.lock().push(i))).unwrap();
        }
        assert_eq!(main.pending(), 3);
        assert!(seen.lock().is_empty());

        assert_eq!(main.run_pending(), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(main.pending(), 0);
        assert_eq!(main.run_pending(), 0);
    }

    /// Тест проверяет, что после остановки задачи отклоняются.
    #[test]
    fn test_post_after_shutdown() {
        let main = MainLoop::new();
        main.shutdown();
        assert!(main.is_closed());
        let err = main.post(Box::new(|| {})).unwrap_err();
        assert_eq!(err, BusError::MainContextClosed);
        assert_eq!(main.pending(), 0);
    }

    /// Тест проверяет, что признак остановки виден через объект контекста.
    #[test]
    fn test_closed_through_trait_object() {
        let main = MainLoop::new();
        let ctx: Arc<dyn MainContext> = main.clone();
        assert!(!ctx.is_closed());
        main.shutdown();
        assert!(ctx.is_closed());
    }

    /// Тест проверяет работу цикла в tokio-задаче и его остановку.
    #[tokio::test]
    async fn test_spawned_loop_executes_and_stops() {
        let main = MainLoop::new();
        let handle = main.spawn();

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        main.post(Box::new(move || {
            let _ = done_tx.send(42);
        }))
        .unwrap();

        let value = timeout(Duration::from_millis(500), done_rx)
            .await
            .expect("timed out")
            .expect("task dropped");
        assert_eq!(value, 42);

        main.shutdown();
        timeout(Duration::from_millis(500), handle)
            .await
            .expect("loop did not stop")
            .expect("loop panicked");
    }
}
