// src/attention.rs
//! Getting the user's attention when something they edited breaks (a shader that no longer
//! compiles, a config that fails validation).

use std::sync::Arc;
use winit::window::{UserAttentionType, Window};

pub trait UserNotifier: Send + Sync {
    /// Flash the taskbar entry / bounce the dock icon.
    fn request_attention(&self);

    /// Show a short error report.
    fn report(&self, title: &str, message: &str);
}

/// Writes reports to the log. Used headless and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn request_attention(&self) {}

    fn report(&self, title: &str, message: &str) {
        log::error!("{title}: {message}");
    }
}

impl UserNotifier for Window {
    fn request_attention(&self) {
        self.request_user_attention(Some(UserAttentionType::Critical));
    }

    fn report(&self, title: &str, message: &str) {
        log::error!("{title}: {message}");
        self.set_title(&format!("{title} - see log"));
    }
}

impl<T: UserNotifier + ?Sized> UserNotifier for Arc<T> {
    fn request_attention(&self) {
        (**self).request_attention();
    }

    fn report(&self, title: &str, message: &str) {
        (**self).report(title, message);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every call, for asserting on reload failures.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub attention: Mutex<usize>,
        pub reports: Mutex<Vec<(String, String)>>,
    }

    impl UserNotifier for RecordingNotifier {
        fn request_attention(&self) {
            *self.attention.lock() += 1;
        }

        fn report(&self, title: &str, message: &str) {
            self.reports.lock().push((title.to_owned(), message.to_owned()));
        }
    }
}
