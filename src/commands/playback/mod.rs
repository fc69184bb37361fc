pub mod playfile;
pub mod stopplayfile;

pub mod utils;

use crate::{CommandResult, Context};
