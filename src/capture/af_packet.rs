//! AF_PACKET socket backend

use super::{Capture, RxInfo};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tracing::info;

/// Raw socket bound to one interface, all EtherTypes
pub struct AfPacketSocket {
    async_fd: AsyncFd<RawFd>,
    ifindex: i32,
    promisc: bool,
}

impl AfPacketSocket {
    /// Open a socket on `ifname`. `promisc` is needed when the stack uses
    /// a MAC other than the interface's own.
    pub fn bind(ifname: &str, promisc: bool) -> Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol as i32) };
        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let ifindex = match Self::get_ifindex(fd, ifname) {
            Ok(i) => i,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let mut sockaddr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sockaddr.sll_family = libc::AF_PACKET as u16;
        sockaddr.sll_protocol = protocol;
        sockaddr.sll_ifindex = ifindex;
        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

        if promisc {
            if let Err(e) = Self::set_promisc(fd, ifindex, true) {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        }

        let async_fd = AsyncFd::new(fd).map_err(Error::Io)?;
        info!("Link: bound to {} (ifindex {})", ifname, ifindex);
        Ok(Self {
            async_fd,
            ifindex,
            promisc,
        })
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
        let not_found = || Error::InterfaceNotFound {
            name: ifname.to_string(),
        };
        let ifname_c = CString::new(ifname).map_err(|_| not_found())?;
        let name_bytes = ifname_c.as_bytes_with_nul();

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        if name_bytes.len() > ifr.ifr_name.len() {
            return Err(not_found());
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = *src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(not_found());
        }
        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn set_promisc(fd: RawFd, ifindex: i32, enable: bool) -> Result<()> {
        let mreq = libc::packet_mreq {
            mr_ifindex: ifindex,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        let optname = if enable {
            libc::PACKET_ADD_MEMBERSHIP
        } else {
            libc::PACKET_DROP_MEMBERSHIP
        };
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                optname,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as u32,
            )
        };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Receive one frame, flagging copies of our own transmissions.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        loop {
            let mut guard = self.async_fd.readable().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let mut from: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
                let mut from_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                let n = unsafe {
                    libc::recvfrom(
                        fd,
                        buf.as_mut_ptr() as *mut _,
                        buf.len(),
                        0,
                        &mut from as *mut _ as *mut libc::sockaddr,
                        &mut from_len,
                    )
                };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(RxInfo {
                        len: n as usize,
                        outgoing: from.sll_pkttype == libc::PACKET_OUTGOING as u8,
                    })
                }
            }) {
                Ok(result) => return result.map_err(Error::Io),
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.writable().await.map_err(Error::Io)?;

            match guard.try_io(|inner| {
                let fd = *inner.get_ref();
                let n = unsafe { libc::send(fd, buf.as_ptr() as *const _, buf.len(), 0) };
                if n < 0 {
                    Err(std::io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(result) => return result.map_err(Error::Io),
                Err(_would_block) => continue,
            }
        }
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        *self.async_fd.get_ref()
    }
}

impl Drop for AfPacketSocket {
    fn drop(&mut self) {
        let fd = *self.async_fd.get_ref();
        if self.promisc {
            let _ = Self::set_promisc(fd, self.ifindex, false);
        }
        unsafe { libc::close(fd) };
    }
}

impl Capture for AfPacketSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        AfPacketSocket::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        AfPacketSocket::send(self, buf).await
    }
}

/// Hardware address of `ifname`, read from sysfs
pub fn interface_mac(ifname: &str) -> Result<MacAddr> {
    let path = format!("/sys/class/net/{}/address", ifname);
    let text = std::fs::read_to_string(&path).map_err(|_| Error::InterfaceNotFound {
        name: ifname.to_string(),
    })?;
    text.trim()
        .parse()
        .map_err(|_| Error::Parse(format!("bad MAC address in {}", path)))
}
