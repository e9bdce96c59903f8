// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-independent client surface: the [`Client`] call primitive, the
//! typed [`Reader`]/[`Writer`] conveniences built on top of it, and
//! [`Context`], the handle returned by every transport's `connect`.

mod coordinator;
#[cfg(any(feature = "tcp", feature = "tls"))]
mod stream;
#[cfg(any(feature = "rtu", feature = "ascii"))]
mod serial;

#[cfg(feature = "ascii")]
pub mod ascii;
#[cfg(feature = "rtu")]
pub mod rtu;
#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
#[cfg(feature = "udp")]
pub mod udp;

use async_trait::async_trait;

use crate::{
    pdu::{Address, Coil, FunctionCode, Quantity, Request, Response, Word},
    slave::{Slave, SlaveContext},
    Error,
};

pub use coordinator::{ConnectionState, RetryPolicy};

/// A transport-independent asynchronous Modbus client.
///
/// `call` is the one primitive every transport must provide; [`Reader`] and
/// [`Writer`] build typed, validated convenience methods for all 19 function
/// codes on top of it.
#[async_trait]
pub trait Client: SlaveContext + Send {
    async fn call(&mut self, request: Request) -> Result<Response, Error>;
}

fn unexpected(expected: &str, got: &Response) -> Error {
    Error::InvalidResponse(format!("expected {expected}, got {got:?}"))
}

/// Typed read operations. Blanket-implemented for every [`Client`].
#[async_trait]
pub trait Reader: Client {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>, Error> {
        match self.call(Request::ReadCoils(addr, cnt)).await? {
            Response::ReadCoils(mut coils) => {
                coils.truncate(cnt as usize);
                Ok(coils)
            }
            other => Err(unexpected("ReadCoils", &other)),
        }
    }

    async fn read_discrete_inputs(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, Error> {
        match self.call(Request::ReadDiscreteInputs(addr, cnt)).await? {
            Response::ReadDiscreteInputs(mut coils) => {
                coils.truncate(cnt as usize);
                Ok(coils)
            }
            other => Err(unexpected("ReadDiscreteInputs", &other)),
        }
    }

    async fn read_input_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        match self.call(Request::ReadInputRegisters(addr, cnt)).await? {
            Response::ReadInputRegisters(words) if words.len() == cnt as usize => Ok(words),
            Response::ReadInputRegisters(_) => {
                Err(Error::InvalidResponse("register count mismatch".into()))
            }
            other => Err(unexpected("ReadInputRegisters", &other)),
        }
    }

    async fn read_holding_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Error> {
        match self.call(Request::ReadHoldingRegisters(addr, cnt)).await? {
            Response::ReadHoldingRegisters(words) if words.len() == cnt as usize => Ok(words),
            Response::ReadHoldingRegisters(_) => {
                Err(Error::InvalidResponse("register count mismatch".into()))
            }
            other => Err(unexpected("ReadHoldingRegisters", &other)),
        }
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>, Error> {
        match self
            .call(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_cnt,
                write_addr,
                write_data.to_vec(),
            ))
            .await?
        {
            Response::ReadWriteMultipleRegisters(words) if words.len() == read_cnt as usize => {
                Ok(words)
            }
            Response::ReadWriteMultipleRegisters(_) => {
                Err(Error::InvalidResponse("register count mismatch".into()))
            }
            other => Err(unexpected("ReadWriteMultipleRegisters", &other)),
        }
    }

    async fn read_exception_status(&mut self) -> Result<u8, Error> {
        match self.call(Request::ReadExceptionStatus).await? {
            Response::ReadExceptionStatus(status) => Ok(status),
            other => Err(unexpected("ReadExceptionStatus", &other)),
        }
    }

    async fn get_comm_event_counter(&mut self) -> Result<(u16, u16), Error> {
        match self.call(Request::GetCommEventCounter).await? {
            Response::GetCommEventCounter(status, count) => Ok((status, count)),
            other => Err(unexpected("GetCommEventCounter", &other)),
        }
    }

    async fn get_comm_event_log(&mut self) -> Result<crate::pdu::CommEventLog, Error> {
        match self.call(Request::GetCommEventLog).await? {
            Response::GetCommEventLog(log) => Ok(log),
            other => Err(unexpected("GetCommEventLog", &other)),
        }
    }

    async fn report_server_id(&mut self) -> Result<crate::pdu::ServerId, Error> {
        match self.call(Request::ReportServerId).await? {
            Response::ReportServerId(id) => Ok(id),
            other => Err(unexpected("ReportServerId", &other)),
        }
    }

    async fn read_file_record(
        &mut self,
        requests: Vec<crate::pdu::ReadFileRecordRequest>,
    ) -> Result<Vec<crate::pdu::FileRecordData>, Error> {
        match self.call(Request::ReadFileRecord(requests)).await? {
            Response::ReadFileRecord(records) => Ok(records),
            other => Err(unexpected("ReadFileRecord", &other)),
        }
    }

    async fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>, Error> {
        match self.call(Request::ReadFifoQueue(addr)).await? {
            Response::ReadFifoQueue(words) => Ok(words),
            other => Err(unexpected("ReadFifoQueue", &other)),
        }
    }

    async fn read_device_identification(
        &mut self,
        read_device_id_code: u8,
        object_id: u8,
    ) -> Result<crate::pdu::DeviceIdentification, Error> {
        match self
            .call(Request::ReadDeviceIdentification(
                read_device_id_code,
                object_id,
            ))
            .await?
        {
            Response::ReadDeviceIdentification(info) => Ok(info),
            other => Err(unexpected("ReadDeviceIdentification", &other)),
        }
    }
}

#[async_trait]
impl<T: Client + ?Sized> Reader for T {}

/// Typed write operations. Blanket-implemented for every [`Client`].
#[async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&mut self, addr: Address, value: Coil) -> Result<(), Error> {
        match self.call(Request::WriteSingleCoil(addr, value)).await? {
            Response::WriteSingleCoil(rsp_addr) if rsp_addr == addr => Ok(()),
            Response::WriteSingleCoil(_) => {
                Err(Error::InvalidResponse("address echo mismatch".into()))
            }
            other => Err(unexpected("WriteSingleCoil", &other)),
        }
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<(), Error> {
        let cnt = coils.len();
        match self
            .call(Request::WriteMultipleCoils(addr, coils.to_vec()))
            .await?
        {
            Response::WriteMultipleCoils(rsp_addr, rsp_cnt)
                if rsp_addr == addr && rsp_cnt as usize == cnt =>
            {
                Ok(())
            }
            Response::WriteMultipleCoils(..) => {
                Err(Error::InvalidResponse("write echo mismatch".into()))
            }
            other => Err(unexpected("WriteMultipleCoils", &other)),
        }
    }

    async fn write_single_register(&mut self, addr: Address, value: Word) -> Result<(), Error> {
        match self.call(Request::WriteSingleRegister(addr, value)).await? {
            Response::WriteSingleRegister(rsp_addr, rsp_value)
                if rsp_addr == addr && rsp_value == value =>
            {
                Ok(())
            }
            Response::WriteSingleRegister(..) => {
                Err(Error::InvalidResponse("write echo mismatch".into()))
            }
            other => Err(unexpected("WriteSingleRegister", &other)),
        }
    }

    async fn write_multiple_registers(&mut self, addr: Address, data: &[Word]) -> Result<(), Error> {
        let cnt = data.len();
        match self
            .call(Request::WriteMultipleRegisters(addr, data.to_vec()))
            .await?
        {
            Response::WriteMultipleRegisters(rsp_addr, rsp_cnt)
                if rsp_addr == addr && rsp_cnt as usize == cnt =>
            {
                Ok(())
            }
            Response::WriteMultipleRegisters(..) => {
                Err(Error::InvalidResponse("write echo mismatch".into()))
            }
            other => Err(unexpected("WriteMultipleRegisters", &other)),
        }
    }

    async fn mask_write_register(
        &mut self,
        addr: Address,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), Error> {
        match self
            .call(Request::MaskWriteRegister(addr, and_mask, or_mask))
            .await?
        {
            Response::MaskWriteRegister(rsp_addr, rsp_and, rsp_or)
                if rsp_addr == addr && rsp_and == and_mask && rsp_or == or_mask =>
            {
                Ok(())
            }
            Response::MaskWriteRegister(..) => {
                Err(Error::InvalidResponse("mask write echo mismatch".into()))
            }
            other => Err(unexpected("MaskWriteRegister", &other)),
        }
    }

    async fn write_file_record(
        &mut self,
        requests: Vec<crate::pdu::FileRecordWrite>,
    ) -> Result<(), Error> {
        match self.call(Request::WriteFileRecord(requests.clone())).await? {
            Response::WriteFileRecord(echoed) if echoed == requests => Ok(()),
            Response::WriteFileRecord(_) => {
                Err(Error::InvalidResponse("file record echo mismatch".into()))
            }
            other => Err(unexpected("WriteFileRecord", &other)),
        }
    }

    async fn diagnostics(&mut self, subfunction: u16, data: [u8; 2]) -> Result<[u8; 2], Error> {
        match self.call(Request::Diagnostics(subfunction, data)).await? {
            Response::Diagnostics(rsp_subfunction, echo) if rsp_subfunction == subfunction => {
                Ok(echo)
            }
            Response::Diagnostics(..) => {
                Err(Error::InvalidResponse("diagnostics sub-function mismatch".into()))
            }
            other => Err(unexpected("Diagnostics", &other)),
        }
    }
}

#[async_trait]
impl<T: Client + ?Sized> Writer for T {}

/// An asynchronous Modbus client handle. Transport-agnostic; every
/// `connect`/`attach` function in this module's sub-modules returns one.
pub struct Context {
    client: Box<dyn Client>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Client for Context {
    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        self.client.call(request).await
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.client.set_slave(slave);
    }
}

/// Synthesizes the echo response a broadcast (unit id 0) write produces,
/// since no real server response is ever awaited for one (Modbus
/// Application Protocol, §4.1.1).
pub(crate) fn synthesize_broadcast_response(request: &Request) -> Option<Response> {
    match request {
        Request::WriteSingleCoil(addr, _coil) => Some(Response::WriteSingleCoil(*addr)),
        Request::WriteSingleRegister(addr, word) => {
            Some(Response::WriteSingleRegister(*addr, *word))
        }
        Request::WriteMultipleCoils(addr, coils) => {
            Some(Response::WriteMultipleCoils(*addr, coils.len() as Quantity))
        }
        Request::WriteMultipleRegisters(addr, words) => {
            Some(Response::WriteMultipleRegisters(*addr, words.len() as Quantity))
        }
        _ => None,
    }
}

pub(crate) fn is_broadcast_writeable(fc: FunctionCode) -> bool {
    matches!(fc, 0x05 | 0x06 | 0x0F | 0x10)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mock {
        slave: Option<Slave>,
        next: Result<Response, Error>,
    }

    #[async_trait]
    impl Client for Mock {
        async fn call(&mut self, _request: Request) -> Result<Response, Error> {
            match &self.next {
                Ok(response) => Ok(response.clone()),
                Err(_) => Err(Error::Timeout),
            }
        }
    }

    impl SlaveContext for Mock {
        fn set_slave(&mut self, slave: Slave) {
            self.slave = Some(slave);
        }
    }

    #[tokio::test]
    async fn read_coils_truncates_to_the_requested_count() {
        let mut mock = Mock {
            slave: None,
            next: Ok(Response::ReadCoils(vec![true, false, true, true])),
        };
        let coils = mock.read_coils(0, 2).await.unwrap();
        assert_eq!(coils, vec![true, false]);
    }

    #[tokio::test]
    async fn write_single_coil_rejects_an_address_mismatch() {
        let mut mock = Mock {
            slave: None,
            next: Ok(Response::WriteSingleCoil(5)),
        };
        let err = mock.write_single_coil(1, true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn context_delegates_to_the_boxed_client() {
        let mock = Mock {
            slave: None,
            next: Ok(Response::ReadHoldingRegisters(vec![1, 2, 3])),
        };
        let mut context = Context::from(Box::new(mock) as Box<dyn Client>);
        let words = context.read_holding_registers(0, 3).await.unwrap();
        assert_eq!(words, vec![1, 2, 3]);
    }

    #[test]
    fn broadcast_writes_synthesize_echo_responses() {
        assert!(matches!(
            synthesize_broadcast_response(&Request::WriteSingleCoil(1, true)),
            Some(Response::WriteSingleCoil(1))
        ));
        assert!(synthesize_broadcast_response(&Request::ReadHoldingRegisters(0, 1)).is_none());
    }

    #[test]
    fn only_the_four_writeable_function_codes_permit_broadcast() {
        assert!(is_broadcast_writeable(0x05));
        assert!(is_broadcast_writeable(0x06));
        assert!(is_broadcast_writeable(0x0F));
        assert!(is_broadcast_writeable(0x10));
        assert!(!is_broadcast_writeable(0x03));
    }
}
