pub use super::audio_metadata::Entity as AudioMetadata;
