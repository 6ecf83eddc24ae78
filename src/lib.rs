//! Convergence acceleration for self-consistent fixed-point loops over vectors that are
//! distributed across a group of ranks: linear mixing and two multi-secant Broyden schemes.
//!
//! A collaborator writes the new estimate element-wise into a [Mixer], calls [Mix::mix] on all
//! ranks and reads back the mixed vector:
//!
//! ```no_run
//! use scfmix::io::MixerConfig;
//! use scfmix::{Mix, Mixer, SelfComm};
//!
//! let config = MixerConfig::default();
//! let mut mixer: Mixer<f64, SelfComm> = config.build_mixer(2, 0, SelfComm).unwrap();
//! mixer.input_shared(0, 1.0).unwrap();
//! mixer.input_shared(1, 2.0).unwrap();
//! mixer.initialize();
//! // ... evaluate, write the output estimate into the input buffer ...
//! let rms: f64 = mixer.mix(config.rss_min).unwrap();
//! let x0: f64 = mixer.output_shared(0).unwrap();
//! ```
pub mod defaults;
pub mod error;
pub mod io;
pub mod mixer;
pub mod scf;
pub mod utils;

pub use error::MixerError;
pub use mixer::{Element, Mix, Mixer, MixerType};
pub use scfmix_comm::{Communicator, SelfComm, ThreadComm};
