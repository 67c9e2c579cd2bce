pub mod exception;
pub mod function_code;
pub mod request;
pub mod response;

pub use exception::{ExceptionCode, ExceptionResponse};
pub use function_code::FunctionCode;
pub use request::{
    DecodedRequest, ReadRequest, Request, WriteMultipleRegistersRequest,
    WriteMultipleRegistersRequestData, WriteSingleCoilRequest, WriteSingleRegisterRequest,
    MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
pub use response::{
    ReadBitsResponse, ReadRegistersResponse, Response, WriteMultipleRegistersResponse,
    WriteSingleCoilResponse, WriteSingleRegisterResponse,
};
