pub mod events;
pub mod models;

pub use events::{
    Address, DepositEvent, EventDiscriminator, FeeCollectedEvent, HarvestEvent,
    VaultInitializedEvent, WithdrawEvent, calculate_discriminator,
};
pub use models::{Event, FetchTask, SignatureInfo};
