pub mod prelude;

pub mod audio_metadata;
