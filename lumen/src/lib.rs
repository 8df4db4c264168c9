use lumen_core::cli::EngineArgs;
use crate::main_loop::EngineLoop;

mod app;
mod events;
mod main_loop;
mod window;

pub use app::{App, RenderList};
pub use events::{translate_key, EventTranslator};
pub use window::{WindowSystem, WindowSystemTransition};
pub use lumen_core::cli::EngineArgs as Args;

pub use paste::paste;

macro_rules! module_facade {
    ($name:ident) => {
        $crate::paste!{
            pub mod $name {
                pub use [<lumen_ $name>]::*;
            }
        }
    };
}

module_facade!(core);
module_facade!(rhi);
module_facade!(renderer);

/// Launch main engine loop with specific App.
pub fn launch<A: App>() -> Result<(), anyhow::Error> {
    let args = EngineArgs::parse_args();

    lumen_core::log::initialize(args.log_level.into())?;
    let _profiler = lumen_core::profile::initialize(args.profile)?;

    let app = A::new(&args)?;

    let main_loop = EngineLoop::new(app, args);
    main_loop.run()?;

    Ok(())
}
