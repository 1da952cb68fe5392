use bluechat_shared::Notification;
use tokio::sync::mpsc;

/// Receives state changes and link data from the connection manager
///
/// Called from role tasks while the manager's lock is held, so
/// implementations must hand the notification off quickly.
pub trait Observer: Send + Sync + 'static {
    fn notify(&self, notification: Notification);
}

impl Observer for mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        // A dropped receiver means nobody is watching any more
        let _ = self.send(notification);
    }
}
