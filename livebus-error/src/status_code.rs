use std::fmt;

use num_enum::TryFromPrimitive;

/// Числовые коды ошибок шины.
///
/// Коды сгруппированы по сотням:
/// - 2xxx: темы
/// - 3xxx: наблюдатели
/// - 4xxx: отложенная доставка
/// - 5xxx: конфигурация и логирование
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    TypeMismatch = 2000,

    ObserverConflict = 3000,

    NoMainContext = 4000,
    MainContextClosed = 4001,

    ConfigInvalid = 5000,
    LoggingInitFailed = 5001,
}

impl StatusCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// `None`, если значение не соответствует ни одному коду.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Ошибка использования API вызывающей стороной (неверный тип темы,
    /// конфликт наблюдателя, неверная конфигурация).
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            Self::TypeMismatch | Self::ObserverConflict | Self::ConfigInvalid
        )
    }
}

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}
