//! Domain layer: entities, events, and validated value objects.

pub mod entities;
pub mod events;
pub mod value_objects;

pub use entities::{
    DeliveryAttempt, DeliveryStats, DeliveryStatus, EnqueueRequest, NewDeliveryAttempt,
    NewNotification, NewTemplate, Notification, NotificationType, PriorityTask, QueueItem,
    QueueStats, QueueStatus, RecipientType, Template, UpdateTemplate,
};
pub use events::{DeliveryEvent, QueueItemEvent, TemplateEvent};
pub use value_objects::{EmailAddress, MaxAttempts, NonEmptyText, Priority};
