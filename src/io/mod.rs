mod imprint;
mod input;
pub(crate) mod settings;

pub use imprint::{write_footer, write_header};
pub use input::read_input;
pub use settings::{
    Configuration, MixerConfig, MixerConfigBuilder, ModelConfig, ParallelizationConfig, SccConfig,
};
