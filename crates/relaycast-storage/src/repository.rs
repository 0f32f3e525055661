//! Repository layer for data access

pub mod campaigns;
pub mod deliveries;
pub mod jobs;
pub mod subscribers;

// Re-export concrete repository implementations
pub use campaigns::DbCampaignRepository;
pub use deliveries::DbDeliveryRepository;
pub use jobs::{JobRepository, QueueStats};
pub use subscribers::DbSubscriberRepository;

// Re-export repository traits
pub use campaigns::CampaignRepository;
pub use deliveries::DeliveryRepository;
pub use subscribers::SubscriberRepository;
