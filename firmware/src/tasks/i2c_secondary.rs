use bevolt_bps::diagnostics::{self, Reply};
use defmt::{Debug2Format, debug, error, info, warn};
use embassy_executor::task;
use embassy_rp::peripherals::I2C1;
use embassy_rp::{bind_interrupts, i2c, i2c_slave};
use shared_types::{DiagnosticError, DiagnosticRequest, DiagnosticResponse};

use crate::config::I2C_ADDR;
use crate::config_resources::I2CSecondaryResources;
use crate::tasks::state_machine::{OPERATOR_CHANNEL, REPLAY_CACHE, SNAPSHOT};

// The diagnostics host talks postcard-encoded `DiagnosticRequest`s:
// - WriteRead [request]: answered in the same transaction.
// - Write [request] then Read: the response to the last write is returned
//   by the next read.
// Operator actions are queued for the monitor task and answered with
// `Accepted`, or `Busy` when the queue is full.

const BUF_SIZE: usize = 64;

bind_interrupts!(struct Irqs {
    I2C1_IRQ => i2c::InterruptHandler<I2C1>;
});

async fn handle(request: &[u8]) -> DiagnosticResponse {
    let request: DiagnosticRequest = match postcard::from_bytes(request) {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed diagnostic request: {}", Debug2Format(&e));
            return DiagnosticResponse::Error {
                error: DiagnosticError::Malformed,
            };
        }
    };
    debug!("Diagnostic request: {}", Debug2Format(&request));

    let snapshot = *SNAPSHOT.lock().await;
    let reply = {
        let cache = REPLAY_CACHE.lock().await;
        diagnostics::respond(&request, &snapshot, &cache)
    };

    match reply {
        Reply::Respond(response) => response,
        Reply::Operator(operator) => match OPERATOR_CHANNEL.try_send(operator) {
            Ok(()) => DiagnosticResponse::Accepted,
            Err(_) => DiagnosticResponse::Error {
                error: DiagnosticError::Busy,
            },
        },
    }
}

async fn respond(device: &mut i2c_slave::I2cSlave<'_, I2C1>, response: &DiagnosticResponse) {
    let mut out = [0u8; BUF_SIZE];
    let encoded = match postcard::to_slice(response, &mut out) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("Could not encode response: {}", Debug2Format(&e));
            return;
        }
    };
    if let Err(e) = device.respond_and_fill(encoded, 0x00).await {
        error!("error while responding {}", e)
    }
}

#[task]
pub async fn i2c_secondary_task(r: I2CSecondaryResources) {
    info!("Starting I2C secondary task");
    let mut config = i2c_slave::Config::default();
    config.addr = I2C_ADDR as u16;
    let mut device = i2c_slave::I2cSlave::new(r.i2c, r.scl, r.sda, Irqs, config);

    let mut pending = DiagnosticResponse::Error {
        error: DiagnosticError::Malformed,
    };

    info!("I2C secondary task initialized");

    loop {
        let mut buf = [0u8; BUF_SIZE];
        match device.listen(&mut buf).await {
            Ok(i2c_slave::Command::GeneralCall(len)) => {
                error!("General call write received: {}", buf[..len]);
            }
            Ok(i2c_slave::Command::Write(len)) => {
                pending = handle(&buf[..len]).await;
            }
            Ok(i2c_slave::Command::Read) => respond(&mut device, &pending).await,
            Ok(i2c_slave::Command::WriteRead(len)) => {
                let response = handle(&buf[..len]).await;
                respond(&mut device, &response).await;
            }
            Err(e) => error!("{}", e),
        }
    }
}
