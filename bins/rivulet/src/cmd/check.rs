use std::sync::Arc;

use rivulet_conn_file::FileConnectionFactory;
use rivulet_engine::SessionController;

use crate::config::{Effective, SinkArgs};
use crate::error::RivuletError;

pub fn run(args: &SinkArgs) -> Result<(), RivuletError> {
    let eff = Effective::new(args)?;
    let factory = Arc::new(FileConnectionFactory::new(&eff.data_dir));
    let controller = SessionController::from_settings(factory, &eff.settings);
    controller.test_connection()?;
    println!("ok: {} ({})", eff.settings.connection_params().address(), eff.data_dir.display());
    Ok(())
}
