/// Немедленно возвращает ошибку, приведённую к `StackError`.
///
/// ```
/// use livebus_error::{bail, BusError, BusResult};
///
/// fn closed() -> BusResult<()> {
///     bail!(BusError::MainContextClosed);
/// }
///
/// assert!(closed().is_err());
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
}

/// Вызывает `bail!`, если условие ложно.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
}

/// Добавление контекста к `Result` с ошибкой, приводимой к `StackError`.
pub trait ResultExt<T> {
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>;

    /// Контекст вычисляется только при ошибке.
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(ctx)),
        }
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(f())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::{BusError, BusResult, ResultExt, StatusCode};

    fn check_threshold(threshold: usize) -> BusResult<usize> {
        ensure!(
            threshold > 0,
            BusError::Config {
                reason: "threshold must be positive".into()
            }
        );
        Ok(threshold)
    }

    #[test]
    fn test_bail() {
        fn closed() -> BusResult<()> {
            bail!(BusError::MainContextClosed);
        }

        assert_eq!(
            closed().unwrap_err().status_code(),
            StatusCode::MainContextClosed
        );
    }

    #[test]
    fn test_ensure() {
        assert_eq!(check_threshold(16).unwrap(), 16);
        let err = check_threshold(0).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ConfigInvalid);
        assert!(err.to_string().contains("threshold must be positive"));
    }

    /// Тест проверяет, что контекст добавляется к ошибке и указывает на
    /// место вызова.
    #[test]
    fn test_context() {
        let err = check_threshold(0).context("loading settings").unwrap_err();
        assert_eq!(err.contexts().len(), 1);
        assert_eq!(err.contexts()[0].message, "loading settings");
        assert!(err.contexts()[0].location.file().ends_with("macros.rs"));
    }

    #[test]
    fn test_with_context_is_lazy() {
        let calls = Cell::new(0);
        let mut ctx = || {
            calls.set(calls.get() + 1);
            "lazy"
        };

        assert!(check_threshold(1).with_context(&mut ctx).is_ok());
        assert_eq!(calls.get(), 0);
        assert!(check_threshold(0).with_context(&mut ctx).is_err());
        assert_eq!(calls.get(), 1);
    }
}
