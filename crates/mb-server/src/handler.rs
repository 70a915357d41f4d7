//! The user-supplied function-code handler (§6 "Handler interface").

use mb_codec::fc::ExceptionCode;

/// Outcome of a single handler call.
///
/// `None` means success — `Ignore` means the request should be
/// silently dropped with no reply (used for broadcast-style writes);
/// any [`ExceptionCode`] means the dispatcher should reply with that
/// exception instead of the normal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerReply<T> {
    /// The call succeeded; for reads, carries the data to send back.
    Ok(T),
    /// The request should produce no reply at all.
    Ignore,
    /// The request is rejected with this exception code.
    Exception(ExceptionCode),
}

/// One method per function-code family, dispatched to by
/// [`crate::engine::ServerEngine`] after a request decodes and passes
/// the address filter.
///
/// Implementors are not required to support every FC: the default for
/// every method is `Exception(IllegalFunction)`.
pub trait RequestHandler: Send {
    /// A short name for this handler, used in logs.
    fn name(&self) -> &str;

    /// Called once per worker-loop iteration, independent of any
    /// request activity. Default no-op.
    fn service(&mut self) {}

    fn read_coils(&mut self, address: u16, count: u16) -> HandlerReply<Vec<bool>> {
        let _ = (address, count);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn read_discrete_inputs(&mut self, address: u16, count: u16) -> HandlerReply<Vec<bool>> {
        let _ = (address, count);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn read_holding_registers(&mut self, address: u16, count: u16) -> HandlerReply<Vec<i16>> {
        let _ = (address, count);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn read_input_registers(&mut self, address: u16, count: u16) -> HandlerReply<Vec<i16>> {
        let _ = (address, count);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> HandlerReply<()> {
        let _ = (address, value);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn write_single_register(&mut self, address: u16, value: i16) -> HandlerReply<()> {
        let _ = (address, value);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn write_multiple_coils(&mut self, address: u16, values: &[bool]) -> HandlerReply<()> {
        let _ = (address, values);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn write_multiple_registers(&mut self, address: u16, values: &[i16]) -> HandlerReply<()> {
        let _ = (address, values);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn mask_write_register(&mut self, address: u16, and_mask: u16, or_mask: u16) -> HandlerReply<()> {
        let _ = (address, and_mask, or_mask);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }

    fn read_write_multiple_registers(
        &mut self,
        read_address: u16,
        read_count: u16,
        write_address: u16,
        write_values: &[i16],
    ) -> HandlerReply<Vec<i16>> {
        let _ = (read_address, read_count, write_address, write_values);
        HandlerReply::Exception(ExceptionCode::IllegalFunction)
    }
}
