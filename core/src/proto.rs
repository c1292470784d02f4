//! Generated wire types plus thin conversions to/from the core's own
//! request/job types.

tonic::include_proto!("warp");

use crate::job::ExecSpec;

impl From<&ExecSpec> for RunExecutableOptions {
    fn from(spec: &ExecSpec) -> Self {
        RunExecutableOptions {
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            working_dir: spec.working_dir.clone().unwrap_or_default(),
        }
    }
}

impl RunExecutableResult {
    pub fn stdout(bytes: Vec<u8>) -> Self {
        RunExecutableResult {
            stdout: bytes,
            ..Default::default()
        }
    }

    pub fn stderr(bytes: Vec<u8>) -> Self {
        RunExecutableResult {
            stderr: bytes,
            ..Default::default()
        }
    }

    pub fn terminal(return_code: i32) -> Self {
        RunExecutableResult {
            return_code,
            has_return_code: true,
            ..Default::default()
        }
    }
}
