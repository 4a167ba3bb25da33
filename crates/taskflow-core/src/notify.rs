use crate::error::NotifyError;

pub trait Notifier {
    fn request_permission(&mut self) -> Result<(), NotifyError>;

    fn notify(&mut self, title: &str, body: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TermNotifier;

impl Notifier for TermNotifier {
    fn request_permission(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn notify(&mut self, title: &str, body: &str) -> Result<(), NotifyError> {
        println!("Reminder: {title} ({body})");
        Ok(())
    }
}
