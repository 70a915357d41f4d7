//! A [`RequestHandler`] backing holding registers and coils with a
//! shared, periodically persisted [`ProcessImage`] (§6 "Handler interface").

use crate::store::ProcessImage;
use mb_codec::fc::ExceptionCode;
use mb_server::{HandlerReply, RequestHandler};
use std::sync::{Arc, Mutex};

/// Answers the register/coil family of function codes from an
/// in-memory image shared with the persistence loop.
pub struct RegisterBankHandler {
    name: String,
    image: Arc<Mutex<ProcessImage>>,
}

impl RegisterBankHandler {
    #[must_use]
    pub fn new(name: impl Into<String>, image: Arc<Mutex<ProcessImage>>) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }

    fn read_span<T: Copy>(data: &[T], address: u16, count: u16) -> Result<Vec<T>, ExceptionCode> {
        let start = address as usize;
        let end = start + count as usize;
        data.get(start..end)
            .map(<[T]>::to_vec)
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn write_one<T>(data: &mut [T], address: u16, value: T) -> Result<(), ExceptionCode> {
        let slot = data
            .get_mut(address as usize)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    fn write_span<T: Copy>(data: &mut [T], address: u16, values: &[T]) -> Result<(), ExceptionCode> {
        let start = address as usize;
        let end = start + values.len();
        let span = data
            .get_mut(start..end)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        span.copy_from_slice(values);
        Ok(())
    }
}

impl RequestHandler for RegisterBankHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_coils(&mut self, address: u16, count: u16) -> HandlerReply<Vec<bool>> {
        let image = self.image.lock().unwrap();
        match Self::read_span(&image.coils, address, count) {
            Ok(values) => HandlerReply::Ok(values),
            Err(e) => HandlerReply::Exception(e),
        }
    }

    fn read_discrete_inputs(&mut self, address: u16, count: u16) -> HandlerReply<Vec<bool>> {
        self.read_coils(address, count)
    }

    fn read_holding_registers(&mut self, address: u16, count: u16) -> HandlerReply<Vec<i16>> {
        let image = self.image.lock().unwrap();
        match Self::read_span(&image.holding_registers, address, count) {
            Ok(values) => HandlerReply::Ok(values),
            Err(e) => HandlerReply::Exception(e),
        }
    }

    fn read_input_registers(&mut self, address: u16, count: u16) -> HandlerReply<Vec<i16>> {
        self.read_holding_registers(address, count)
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> HandlerReply<()> {
        let mut image = self.image.lock().unwrap();
        match Self::write_one(&mut image.coils, address, value) {
            Ok(()) => HandlerReply::Ok(()),
            Err(e) => HandlerReply::Exception(e),
        }
    }

    fn write_single_register(&mut self, address: u16, value: i16) -> HandlerReply<()> {
        let mut image = self.image.lock().unwrap();
        match Self::write_one(&mut image.holding_registers, address, value) {
            Ok(()) => HandlerReply::Ok(()),
            Err(e) => HandlerReply::Exception(e),
        }
    }

    fn write_multiple_coils(&mut self, address: u16, values: &[bool]) -> HandlerReply<()> {
        let mut image = self.image.lock().unwrap();
        match Self::write_span(&mut image.coils, address, values) {
            Ok(()) => HandlerReply::Ok(()),
            Err(e) => HandlerReply::Exception(e),
        }
    }

    fn write_multiple_registers(&mut self, address: u16, values: &[i16]) -> HandlerReply<()> {
        let mut image = self.image.lock().unwrap();
        match Self::write_span(&mut image.holding_registers, address, values) {
            Ok(()) => HandlerReply::Ok(()),
            Err(e) => HandlerReply::Exception(e),
        }
    }

    fn mask_write_register(&mut self, address: u16, and_mask: u16, or_mask: u16) -> HandlerReply<()> {
        let mut image = self.image.lock().unwrap();
        let Some(slot) = image.holding_registers.get_mut(address as usize) else {
            return HandlerReply::Exception(ExceptionCode::IllegalDataAddress);
        };
        let current = *slot as u16;
        *slot = ((current & and_mask) | (or_mask & !and_mask)) as i16;
        HandlerReply::Ok(())
    }

    fn read_write_multiple_registers(
        &mut self,
        read_address: u16,
        read_count: u16,
        write_address: u16,
        write_values: &[i16],
    ) -> HandlerReply<Vec<i16>> {
        let mut image = self.image.lock().unwrap();
        if let Err(e) = Self::write_span(&mut image.holding_registers, write_address, write_values) {
            return HandlerReply::Exception(e);
        }
        match Self::read_span(&image.holding_registers, read_address, read_count) {
            Ok(values) => HandlerReply::Ok(values),
            Err(e) => HandlerReply::Exception(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> RegisterBankHandler {
        RegisterBankHandler::new("test", Arc::new(Mutex::new(ProcessImage::new(16, 16))))
    }

    #[test]
    fn write_then_read_single_register() {
        let mut h = handler();
        assert_eq!(h.write_single_register(3, 42), HandlerReply::Ok(()));
        assert_eq!(h.read_holding_registers(3, 1), HandlerReply::Ok(vec![42]));
    }

    #[test]
    fn read_out_of_range_is_illegal_address() {
        let mut h = handler();
        assert_eq!(
            h.read_holding_registers(10, 10),
            HandlerReply::Exception(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn mask_write_applies_and_or_masks() {
        let mut h = handler();
        let _ = h.write_single_register(0, 0x0012);
        let _ = h.mask_write_register(0, 0x00F2, 0x0025);
        assert_eq!(h.read_holding_registers(0, 1), HandlerReply::Ok(vec![0x17]));
    }
}
