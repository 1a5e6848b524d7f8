//! Captured tool output shared by the device and collector tests

pub(crate) const DEVICE_INFO_OUTPUT: &str = "<date>\n1686916187.0584\n</date>\n\
<gnss>\ngnss0\n</gnss>\n\
<devID>\n0x1593\n</devID>\n\
<vendorID>\n0x8086\n</vendorID>\n\
<ethtoolOut>\ndriver: ice\nversion: 1.11.20.7\nfirmware-version: 4.20 0x8001778b 1.3346.0\n\
expansion-rom-version:\nbus-info: 0000:86:00.0\nsupports-statistics: yes\n</ethtoolOut>\n";

pub(crate) const UBX_OUTPUT: &str = r#"<GNSS>
1686916187.0584
UBX-NAV-STATUS:
  iTOW 474605000 gpsFix 3 flags 0xdd fixStat 0x0 flags2 0x8
  ttff 25030, msss 4294967295

1686916187.0586
UBX-NAV-CLOCK:
  iTOW 474605000 clkB -61594 clkD -56 tAcc 5 fAcc 164

1686916187.0590
UBX-MON-RF:
 version 0 nBlocks 2 reserved1 0 0
   blockId 0 flags x0 antStatus 2 antPower 1 postStatus 0 reserved2 0 0 0 0
    noisePerMS 90 agcCnt 4914 jamInd 14 ofsI 15 magI 147 ofsQ 25 magQ 148
    reserved3 0 0 0
   blockId 1 flags x0 antStatus 2 antPower 1 postStatus 0 reserved2 0 0 0 0
    noisePerMS 47 agcCnt 6318 jamInd 6 ofsI 17 magI 151 ofsQ 3 magQ 149
    reserved3 0 0 0

</GNSS>
"#;

pub(crate) const GNSS_VERSIONS_OUTPUT: &str = r#"<UBXMonVer>
1689260332.4728
UBX-MON-VER:
  swVersion EXT CORE 1.00 (3fda8e)
  hwVersion 00190000
  extension ROM BASE 0x118B2060
  extension FWVER=TIM 2.20
  extension PROTVER=29.20
  extension MOD=ZED-F9T
  extension GPS;GLO;GAL;BDS
  extension SBAS;QZSS
  extension NAVIC

</UBXMonVer>
<UBXVersion>
ubxtool: Version 3.25.1~dev
</UBXVersion>
<GPSDVersion>
gpsd: 3.25.1~dev (revision release-3.25-109-g1a04cfab8)
</GPSDVersion>
<GNSSDevices>
gnss0
</GNSSDevices>
"#;

pub(crate) const PMC_OUTPUT: &str = "<date>\n1686916187.0584\n</date>\n\
<PMC>\n\
sending: GET GRANDMASTER_SETTINGS_NP\n\
\t507c6f.fffe.30fbe8-0 seq 0 RESPONSE MANAGEMENT GRANDMASTER_SETTINGS_NP\n\
\t\tclockClass              248\n\
\t\tclockAccuracy           0xfe\n\
\t\toffsetScaledLogVariance 0xffff\n\
\t\tcurrentUtcOffset        37\n\
\t\tleap61                  0\n\
\t\tleap59                  0\n\
\t\tcurrentUtcOffsetValid   0\n\
\t\tptpTimescale            1\n\
\t\ttimeTraceable           0\n\
\t\tfrequencyTraceable      0\n\
\t\ttimeSource              0xa0\n\
</PMC>\n";

pub(crate) const DPLL_FS_OUTPUT: &str = "<date>\n1686916187.0584\n</date>\n\
<dpll_0_state>\n2\n</dpll_0_state>\n\
<dpll_1_state>\n3\n</dpll_1_state>\n\
<dpll_1_offset>\n-25\n</dpll_1_offset>\n";

pub(crate) const DPLL_FS_LISTING: &str = "<paths>\n\
aer_dev_correctable\n\
device\n\
dpll_0_state\n\
dpll_1_offset\n\
dpll_1_state\n\
gnss\n\
vendor\n\
</paths>\n";

/// Clock ID `0x507c6fffff0fb1b8` in decimal
pub(crate) const NETLINK_CLOCK_ID: u64 = 5799633565433967032;

pub(crate) const NETLINK_PINS: &str = r#"[
  {"board-label": "GNSS-1PPS", "clock-id": 5799633565433967032, "id": 3, "type": "gnss",
   "parent-device": [
     {"direction": "input", "parent-id": 0, "phase-offset": -1536231, "prio": 0, "state": "connected"},
     {"direction": "input", "parent-id": 1, "phase-offset": 77341, "prio": 0, "state": "connected"}]},
  {"board-label": "SMA1", "clock-id": 5799633565433967032, "id": 1, "type": "ext",
   "parent-device": [
     {"direction": "input", "parent-id": 0, "phase-offset": 0, "prio": 2, "state": "selectable"},
     {"direction": "input", "parent-id": 1, "phase-offset": 0, "prio": 2, "state": "selectable"}]},
  {"board-label": "GNSS-1PPS", "clock-id": 42, "id": 9, "type": "gnss",
   "parent-device": [
     {"direction": "input", "parent-id": 2, "phase-offset": 0, "prio": 0, "state": "connected"}]}
]"#;

pub(crate) const NETLINK_DEVICES: &str = r#"[
  {"clock-id": 5799633565433967032, "id": 0, "lock-status": "locked-ho-acq", "mode": "automatic",
   "module-name": "ice", "type": "eec"},
  {"clock-id": 5799633565433967032, "id": 1, "lock-status": "holdover", "mode": "automatic",
   "module-name": "ice", "type": "pps"},
  {"clock-id": 42, "id": 2, "lock-status": "freerun", "mode": "automatic",
   "module-name": "ice", "type": "pps"}
]"#;

pub(crate) const NETLINK_OFFSET_PIN: &str = r#"{"board-label": "GNSS-1PPS", "clock-id": 5799633565433967032, "id": 3,
  "parent-device": [
    {"direction": "input", "parent-id": 0, "phase-offset": -1536231, "prio": 0, "state": "connected"},
    {"direction": "input", "parent-id": 1, "phase-offset": 77341, "prio": 0, "state": "connected"}]}"#;

/// Wrap `value` in the tags of `key`
pub(crate) fn tagged(key: &str, value: &str) -> String {
    format!("<{0}>\n{1}\n</{0}>\n", key, value)
}
