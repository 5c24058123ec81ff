//! Error-construction and `ensure!`-style macros.

/// Build a config error.
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::EngineError::config($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::EngineError::config(format!($fmt, $($arg)*))
    };
}

/// Build a network error.
#[macro_export]
macro_rules! network_error {
    ($msg:expr) => {
        $crate::error::EngineError::network($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::EngineError::network(format!($fmt, $($arg)*))
    };
}

/// Build a serialization error.
#[macro_export]
macro_rules! serialization_error {
    ($msg:expr) => {
        $crate::error::EngineError::serialization($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::EngineError::serialization(format!($fmt, $($arg)*))
    };
}

/// Build an auth error.
#[macro_export]
macro_rules! auth_error {
    ($msg:expr) => {
        $crate::error::EngineError::auth($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::EngineError::auth(format!($fmt, $($arg)*))
    };
}

/// Build a keyring error.
#[macro_export]
macro_rules! keyring_error {
    ($msg:expr) => {
        $crate::error::EngineError::keyring($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::EngineError::keyring(format!($fmt, $($arg)*))
    };
}

/// Build an internal error.
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::EngineError::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::EngineError::internal(format!($fmt, $($arg)*))
    };
}

/// Return a config error unless `$cond` holds.
#[macro_export]
macro_rules! ensure_config {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::config_error!($msg));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::config_error!($fmt, $($arg)*));
        }
    };
}

/// Return a network error unless `$cond` holds.
#[macro_export]
macro_rules! ensure_network {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::network_error!($msg));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::network_error!($fmt, $($arg)*));
        }
    };
}

/// Return an auth error unless `$cond` holds.
#[macro_export]
macro_rules! ensure_auth {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::auth_error!($msg));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::auth_error!($fmt, $($arg)*));
        }
    };
}

/// Return a keyring error unless `$cond` holds.
#[macro_export]
macro_rules! ensure_keyring {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::keyring_error!($msg));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::keyring_error!($fmt, $($arg)*));
        }
    };
}
