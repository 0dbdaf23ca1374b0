pub mod cloud;
pub mod config;
pub mod definition;
pub mod history;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod produce;
pub mod redacted;
pub mod registry;
pub mod result_error;
pub mod retention;
pub mod run;
pub mod scheduler;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
